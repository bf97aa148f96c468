//! Auflösung effektiver Mappings mit Ebenen-Fallthrough
//!
//! Die Auflösung ist eine reine Funktion über (Profil, Ebenen-Stack,
//! Frontmost-App, Button) - ohne Seiteneffekte, beliebig oft aufrufbar.

use crate::controller::event_collector::ButtonId;
use crate::mapping::profile::{Binding, Profile};
use tracing::debug;

/// Stack der aktiven Overlay-Ebenen. Push beim Aktivator-Druck, Pop beim
/// zugehörigen Release - Pop entfernt die oberste Instanz der Ebene, ohne
/// die Reihenfolge der übrigen zu stören (verschachtelte Holds dürfen in
/// beliebiger Reihenfolge losgelassen werden).
#[derive(Clone, Debug, Default)]
pub struct LayerStack {
    active: Vec<String>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: &str) {
        debug!("Layer pushed: {}", layer);
        self.active.push(layer.to_string());
    }

    /// Entfernt die oberste Instanz der Ebene. Liefert false, wenn die
    /// Ebene nicht aktiv war (z.B. Release nach Profilwechsel).
    pub fn pop(&mut self, layer: &str) -> bool {
        match self.active.iter().rposition(|name| name == layer) {
            Some(index) => {
                self.active.remove(index);
                debug!("Layer popped: {}", layer);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Ebenen von oben nach unten (zuletzt aktivierte zuerst)
    pub fn iter_top_down(&self) -> impl Iterator<Item = &str> {
        self.active.iter().rev().map(String::as_str)
    }

    pub fn top(&self) -> Option<&str> {
        self.active.last().map(String::as_str)
    }
}

/// Liefert das effektive Binding für einen Button: App-Overrides zuerst,
/// dann die aktiven Ebenen von oben nach unten, zuletzt die Basis-Ebene.
/// Aktivator-Buttons erhalten nie ein aufgelöstes Binding - die
/// Aktivator-Rolle ist autoritativ.
pub fn effective_binding<'p>(
    profile: &'p Profile,
    stack: &LayerStack,
    frontmost_app: Option<&str>,
    button: ButtonId,
) -> Option<&'p Binding> {
    if profile.layer_activators.contains_key(&button) {
        return None;
    }

    if let Some(app) = frontmost_app {
        if let Some(binding) = profile
            .app_overrides
            .get(app)
            .and_then(|bindings| bindings.get(&button))
        {
            return Some(binding);
        }
    }

    for layer_name in stack.iter_top_down() {
        if let Some(binding) = profile
            .layer(layer_name)
            .and_then(|layer| layer.bindings.get(&button))
        {
            return Some(binding);
        }
    }

    profile.base.get(&button)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::profile::Layer;
    use crate::mapping::Action;
    use std::collections::HashMap;

    fn key(name: &str) -> Action {
        Action::Key {
            key: name.to_string(),
            modifiers: Vec::new(),
        }
    }

    fn press(name: &str) -> Binding {
        Binding {
            press: Some(key(name)),
            ..Default::default()
        }
    }

    fn test_profile() -> Profile {
        let mut profile = Profile::default_profile();

        let mut l1 = HashMap::new();
        l1.insert(ButtonId::A, press("l1-a"));
        l1.insert(ButtonId::B, press("l1-b"));
        let mut l2 = HashMap::new();
        l2.insert(ButtonId::A, press("l2-a"));

        profile.layers = vec![
            Layer {
                name: "l1".to_string(),
                bindings: l1,
            },
            Layer {
                name: "l2".to_string(),
                bindings: l2,
            },
        ];
        profile.layer_activators.clear();
        profile
            .layer_activators
            .insert(ButtonId::LeftBumper, "l1".to_string());
        profile
            .layer_activators
            .insert(ButtonId::RightBumper, "l2".to_string());
        profile.base.insert(ButtonId::A, press("base-a"));
        profile.base.insert(ButtonId::B, press("base-b"));
        profile.base.insert(ButtonId::X, press("base-x"));
        profile
    }

    #[test]
    fn topmost_layer_wins_with_fallthrough() {
        let profile = test_profile();
        let mut stack = LayerStack::new();
        stack.push("l1");
        stack.push("l2");

        // l2 defines A, so it wins.
        let binding = effective_binding(&profile, &stack, None, ButtonId::A).unwrap();
        assert_eq!(binding.press, Some(key("l2-a")));

        // l2 does not define B, falls through to l1.
        let binding = effective_binding(&profile, &stack, None, ButtonId::B).unwrap();
        assert_eq!(binding.press, Some(key("l1-b")));

        // Nobody defines X except base.
        let binding = effective_binding(&profile, &stack, None, ButtonId::X).unwrap();
        assert_eq!(binding.press, Some(key("base-x")));
    }

    #[test]
    fn base_mapping_unchanged_without_layer_override() {
        let profile = test_profile();
        let empty = LayerStack::new();
        let direct = effective_binding(&profile, &empty, None, ButtonId::X).unwrap();

        let mut stack = LayerStack::new();
        stack.push("l2");
        let through_layers = effective_binding(&profile, &stack, None, ButtonId::X).unwrap();

        assert_eq!(direct.press, through_layers.press);
    }

    #[test]
    fn activator_buttons_resolve_to_nothing() {
        let profile = test_profile();
        let stack = LayerStack::new();
        assert!(effective_binding(&profile, &stack, None, ButtonId::LeftBumper).is_none());
    }

    #[test]
    fn app_override_beats_layers() {
        let mut profile = test_profile();
        let mut app_bindings = HashMap::new();
        app_bindings.insert(ButtonId::A, press("app-a"));
        profile
            .app_overrides
            .insert("org.example.editor".to_string(), app_bindings);

        let mut stack = LayerStack::new();
        stack.push("l2");

        let binding =
            effective_binding(&profile, &stack, Some("org.example.editor"), ButtonId::A).unwrap();
        assert_eq!(binding.press, Some(key("app-a")));

        // Other apps are unaffected.
        let binding =
            effective_binding(&profile, &stack, Some("org.example.other"), ButtonId::A).unwrap();
        assert_eq!(binding.press, Some(key("l2-a")));
    }

    #[test]
    fn pop_removes_by_identity_not_position() {
        let mut stack = LayerStack::new();
        stack.push("l1");
        stack.push("l2");

        // Releasing l1's activator first must leave l2 active on top.
        assert!(stack.pop("l1"));
        assert_eq!(stack.top(), Some("l2"));

        assert!(stack.pop("l2"));
        assert!(stack.is_empty());

        // Popping a layer that is not active is a no-op.
        assert!(!stack.pop("l2"));
    }

    #[test]
    fn nested_same_layer_pops_topmost_instance() {
        let mut stack = LayerStack::new();
        stack.push("l1");
        stack.push("l2");
        stack.push("l1");

        assert!(stack.pop("l1"));
        let remaining: Vec<&str> = stack.iter_top_down().collect();
        assert_eq!(remaining, vec!["l2", "l1"]);
    }
}
