//! Profil-Datenmodell und Ladelogik
//!
//! Ein Profil ist der unveränderliche Snapshot aller Bindings, Ebenen,
//! Chords und Sequenzen. Die Datei-Repräsentation benutzt String-Schlüssel
//! (TOML), die Auflösung in [`ButtonId`]-Schlüssel passiert einmalig beim
//! Laden, zusammen mit der kompletten Validierung.

use crate::config::{clamp_sequence_window, TunableOverrides};
use crate::controller::event_collector::ButtonId;
use crate::mapping::{Action, Modifier, MouseButtonKind, ProfileError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bindings eines einzelnen Buttons. Alle Felder optional; `hold` markiert
/// ein Hold-Style-Mapping (Start/Stop statt diskretem Feuern).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Binding {
    pub press: Option<Action>,
    pub long_hold: Option<Action>,
    pub double_tap: Option<Action>,
    pub hold: Option<Action>,
    pub repeat: Option<Action>,
    /// Wiederholintervall in Millisekunden; ohne Angabe gilt der Default
    /// aus den Tunables.
    pub repeat_interval_ms: Option<u64>,
}

impl Binding {
    fn press(action: Action) -> Self {
        Self {
            press: Some(action),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.press.is_none()
            && self.long_hold.is_none()
            && self.double_tap.is_none()
            && self.hold.is_none()
            && self.repeat.is_none()
    }
}

/// Benannte Overlay-Ebene mit einer Teilmenge von Button-Bindings
#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub bindings: HashMap<ButtonId, Binding>,
}

/// Chord-Definition; `buttons` ist beim Laden kanonisch sortiert
#[derive(Clone, Debug)]
pub struct ChordDef {
    pub buttons: Vec<ButtonId>,
    pub action: Action,
}

/// Sequenz-Definition (geordnete Button-Folge innerhalb eines Zeitfensters)
#[derive(Clone, Debug)]
pub struct SequenceDef {
    pub steps: Vec<ButtonId>,
    pub window: Duration,
    pub action: Action,
    /// true: Einzel-Aktionen der beteiligten Buttons feuern zusätzlich.
    /// Default ist Unterdrückung.
    pub co_fire: bool,
}

/// Touchpad-Gesten-Bindings
#[derive(Clone, Debug, Default)]
pub struct TouchBindings {
    pub tap: Option<Action>,
    pub long_tap: Option<Action>,
    pub two_finger_tap: Option<Action>,
    pub zoom_in: Option<Action>,
    pub zoom_out: Option<Action>,
}

/// Modus eines Sticks im Polling-Loop
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StickMode {
    #[default]
    Pointer,
    Scroll,
    DirectionalKeys {
        up: Action,
        down: Action,
        left: Action,
        right: Action,
    },
    Disabled,
}

/// Aufgelöstes, unveränderliches Profil
#[derive(Clone, Debug)]
pub struct Profile {
    pub name: String,
    pub base: HashMap<ButtonId, Binding>,
    pub layers: Vec<Layer>,
    pub layer_activators: HashMap<ButtonId, String>,
    pub chords: Vec<ChordDef>,
    /// Längste Sequenz zuerst; Gleichstand in Deklarationsreihenfolge.
    pub sequences: Vec<SequenceDef>,
    pub app_overrides: HashMap<String, HashMap<ButtonId, Binding>>,
    pub touch: TouchBindings,
    pub left_stick: StickMode,
    pub right_stick: StickMode,
    pub tunables: TunableOverrides,
}

impl Profile {
    /// Liefert die Ebene mit dem angegebenen Namen
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    /// Sucht einen Chord; `buttons` muss kanonisch sortiert sein
    pub fn chord_for(&self, buttons: &[ButtonId]) -> Option<&ChordDef> {
        debug_assert!(buttons.windows(2).all(|w| w[0] <= w[1]));
        self.chords.iter().find(|chord| chord.buttons == buttons)
    }

    /// Ob der Button in mindestens einem Chord vorkommt
    pub fn is_chord_member(&self, button: ButtonId) -> bool {
        self.chords
            .iter()
            .any(|chord| chord.buttons.contains(&button))
    }

    /// Kapazität des Sequenz-Verlaufspuffers
    pub fn longest_sequence_len(&self) -> usize {
        self.sequences
            .iter()
            .map(|sequence| sequence.steps.len())
            .max()
            .unwrap_or(0)
    }

    /// Größtes konfiguriertes Sequenz-Zeitfenster (Pruning-Horizont)
    pub fn longest_sequence_window(&self) -> Duration {
        self.sequences
            .iter()
            .map(|sequence| sequence.window)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Pfad der Profildatei im Benutzer-Konfigurationsverzeichnis
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("padmap").join("profile.toml"))
    }

    /// Lädt ein Profil aus einer TOML-Datei
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        info!("Loading profile from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let file: ProfileFile = toml::from_str(&raw)?;
        Self::resolve(file)
    }

    /// Lädt das Profil von [`Profile::default_path`], fällt auf das
    /// eingebaute Standardprofil zurück, wenn keine Datei existiert
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(profile) => return profile,
                Err(e) => {
                    warn!("Failed to load profile, using built-in default: {}", e);
                }
            },
            _ => debug!("No profile file found, using built-in default"),
        }
        Self::default_profile()
    }

    /// Eingebautes Standardprofil
    pub fn default_profile() -> Self {
        let mut base = HashMap::new();
        base.insert(ButtonId::A, Binding::press(key("enter")));
        base.insert(ButtonId::B, Binding::press(key("esc")));
        base.insert(
            ButtonId::X,
            Binding {
                press: Some(key("space")),
                long_hold: Some(key_mod("space", Modifier::Ctrl)),
                ..Default::default()
            },
        );
        base.insert(
            ButtonId::Y,
            Binding {
                press: Some(key("tab")),
                double_tap: Some(key_mod("tab", Modifier::Alt)),
                ..Default::default()
            },
        );
        base.insert(ButtonId::DPadUp, Binding::press(key("up")));
        base.insert(ButtonId::DPadDown, Binding::press(key("down")));
        base.insert(ButtonId::DPadLeft, Binding::press(key("left")));
        base.insert(ButtonId::DPadRight, Binding::press(key("right")));
        base.insert(ButtonId::Guide, Binding::press(key("leftmeta")));
        base.insert(
            ButtonId::RightBumper,
            Binding {
                hold: Some(key("leftshift")),
                double_tap: Some(key("capslock")),
                ..Default::default()
            },
        );

        let mut nav_bindings = HashMap::new();
        nav_bindings.insert(ButtonId::DPadUp, Binding::press(key("pageup")));
        nav_bindings.insert(ButtonId::DPadDown, Binding::press(key("pagedown")));
        nav_bindings.insert(ButtonId::DPadLeft, Binding::press(key("home")));
        nav_bindings.insert(ButtonId::DPadRight, Binding::press(key("end")));

        let mut layer_activators = HashMap::new();
        layer_activators.insert(ButtonId::LeftBumper, "nav".to_string());

        let chords = vec![ChordDef {
            buttons: canonical_chord(vec![ButtonId::Start, ButtonId::Select]),
            action: key_mod("l", Modifier::Meta),
        }];

        let sequences = vec![SequenceDef {
            steps: vec![ButtonId::DPadUp, ButtonId::DPadUp, ButtonId::A],
            window: Duration::from_millis(800),
            action: key("f5"),
            co_fire: false,
        }];

        Profile {
            name: "default".to_string(),
            base,
            layers: vec![Layer {
                name: "nav".to_string(),
                bindings: nav_bindings,
            }],
            layer_activators,
            chords,
            sequences,
            app_overrides: HashMap::new(),
            touch: TouchBindings {
                tap: Some(Action::MouseButton {
                    button: MouseButtonKind::Left,
                }),
                long_tap: Some(Action::MouseButton {
                    button: MouseButtonKind::Right,
                }),
                two_finger_tap: Some(Action::MouseButton {
                    button: MouseButtonKind::Middle,
                }),
                zoom_in: Some(key_mod("equal", Modifier::Ctrl)),
                zoom_out: Some(key_mod("minus", Modifier::Ctrl)),
            },
            left_stick: StickMode::Pointer,
            right_stick: StickMode::Scroll,
            tunables: TunableOverrides::default(),
        }
    }

    /// Auflösung und Validierung der Datei-Repräsentation
    fn resolve(file: ProfileFile) -> Result<Self, ProfileError> {
        let base = resolve_bindings(file.bindings)?;

        let mut layers = Vec::new();
        for (name, layer_file) in file.layers {
            layers.push(Layer {
                bindings: resolve_bindings(layer_file.bindings)?,
                name,
            });
        }

        let mut layer_activators = HashMap::new();
        for (button_name, layer_name) in file.layer_activators {
            let button = parse_button(&button_name)?;
            if !layers.iter().any(|layer| layer.name == layer_name) {
                return Err(ProfileError::UnknownLayer(layer_name));
            }
            layer_activators.insert(button, layer_name);
        }

        // Aktivator-Rolle ist autoritativ; Konflikte werden beim Laden
        // gemeldet, nicht erst zur Laufzeit.
        for (button, layer_name) in &layer_activators {
            let conflict = base.get(button).map(|b| !b.is_empty()).unwrap_or(false)
                || layers
                    .iter()
                    .any(|layer| layer.bindings.contains_key(button));
            if conflict {
                warn!(
                    "Button {:?} is activator for layer '{}' and carries other bindings; \
                     the activator role wins",
                    button, layer_name
                );
            }
        }

        let mut chords = Vec::new();
        for chord_file in file.chords {
            let mut buttons = Vec::new();
            for name in &chord_file.buttons {
                buttons.push(parse_button(name)?);
            }
            if buttons.len() < 2 {
                return Err(ProfileError::ConfigError(format!(
                    "Chord needs at least two buttons, got {:?}",
                    chord_file.buttons
                )));
            }
            let buttons = canonical_chord(buttons);
            if chords
                .iter()
                .any(|existing: &ChordDef| existing.buttons == buttons)
            {
                warn!("Duplicate chord {:?}, first definition wins", buttons);
                continue;
            }
            chords.push(ChordDef {
                buttons,
                action: chord_file.action,
            });
        }

        let mut sequences = Vec::new();
        for sequence_file in file.sequences {
            let mut steps = Vec::new();
            for name in &sequence_file.steps {
                steps.push(parse_button(name)?);
            }
            if steps.len() < 2 {
                return Err(ProfileError::InvalidSequence(format!(
                    "Sequence needs at least two steps, got {:?}",
                    sequence_file.steps
                )));
            }
            // Ein einzelner wiederholter Button ist nicht von einem
            // Double-Tap unterscheidbar - beim Laden ablehnen.
            if steps.iter().all(|step| *step == steps[0]) {
                return Err(ProfileError::InvalidSequence(format!(
                    "Sequence of a single repeated button is ambiguous: {:?}",
                    sequence_file.steps
                )));
            }
            sequences.push(SequenceDef {
                steps,
                window: clamp_sequence_window(Duration::from_millis(sequence_file.window_ms)),
                action: sequence_file.action,
                co_fire: sequence_file.co_fire,
            });
        }
        // Längste zuerst; stabile Sortierung erhält die
        // Deklarationsreihenfolge bei Gleichstand.
        sequences.sort_by_key(|sequence| std::cmp::Reverse(sequence.steps.len()));

        let mut app_overrides = HashMap::new();
        for (app, bindings) in file.apps {
            app_overrides.insert(app, resolve_bindings(bindings)?);
        }

        let profile = Profile {
            name: file.name,
            base,
            layers,
            layer_activators,
            chords,
            sequences,
            app_overrides,
            touch: TouchBindings {
                tap: file.touch.tap,
                long_tap: file.touch.long_tap,
                two_finger_tap: file.touch.two_finger_tap,
                zoom_in: file.touch.zoom_in,
                zoom_out: file.touch.zoom_out,
            },
            left_stick: file.left_stick,
            right_stick: file.right_stick,
            tunables: file.tunables,
        };
        info!(
            "Profile '{}' loaded: {} base bindings, {} layers, {} chords, {} sequences",
            profile.name,
            profile.base.len(),
            profile.layers.len(),
            profile.chords.len(),
            profile.sequences.len()
        );
        Ok(profile)
    }
}

/// Sortiert ein Chord-Button-Set in die kanonische Reihenfolge
pub fn canonical_chord(mut buttons: Vec<ButtonId>) -> Vec<ButtonId> {
    buttons.sort();
    buttons.dedup();
    buttons
}

fn parse_button(name: &str) -> Result<ButtonId, ProfileError> {
    ButtonId::from_name(name).ok_or_else(|| ProfileError::UnknownButton(name.to_string()))
}

fn resolve_bindings(
    bindings: HashMap<String, Binding>,
) -> Result<HashMap<ButtonId, Binding>, ProfileError> {
    let mut resolved = HashMap::new();
    for (name, binding) in bindings {
        resolved.insert(parse_button(&name)?, binding);
    }
    Ok(resolved)
}

fn key(name: &str) -> Action {
    Action::Key {
        key: name.to_string(),
        modifiers: Vec::new(),
    }
}

fn key_mod(name: &str, modifier: Modifier) -> Action {
    Action::Key {
        key: name.to_string(),
        modifiers: vec![modifier],
    }
}

// Datei-Repräsentation (String-Schlüssel, Dauern in Millisekunden)

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    name: String,
    #[serde(default)]
    bindings: HashMap<String, Binding>,
    #[serde(default)]
    layers: HashMap<String, LayerFile>,
    #[serde(default)]
    layer_activators: HashMap<String, String>,
    #[serde(default)]
    chords: Vec<ChordFile>,
    #[serde(default)]
    sequences: Vec<SequenceFile>,
    #[serde(default)]
    apps: HashMap<String, HashMap<String, Binding>>,
    #[serde(default)]
    touch: TouchFile,
    #[serde(default)]
    left_stick: StickMode,
    #[serde(default)]
    right_stick: StickMode,
    #[serde(default)]
    tunables: TunableOverrides,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayerFile {
    #[serde(default)]
    bindings: HashMap<String, Binding>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChordFile {
    buttons: Vec<String>,
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SequenceFile {
    steps: Vec<String>,
    #[serde(default = "default_sequence_window_ms")]
    window_ms: u64,
    action: Action,
    #[serde(default)]
    co_fire: bool,
}

fn default_sequence_window_ms() -> u64 {
    800
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct TouchFile {
    tap: Option<Action>,
    long_tap: Option<Action>,
    two_finger_tap: Option<Action>,
    zoom_in: Option<Action>,
    zoom_out: Option<Action>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        let profile = Profile::default_profile();
        assert!(profile.is_chord_member(ButtonId::Start));
        assert!(profile.is_chord_member(ButtonId::Select));
        assert!(!profile.is_chord_member(ButtonId::A));
        assert_eq!(profile.longest_sequence_len(), 3);
        assert_eq!(profile.longest_sequence_window(), Duration::from_millis(800));
    }

    #[test]
    fn chord_lookup_requires_canonical_order() {
        let profile = Profile::default_profile();
        let set = canonical_chord(vec![ButtonId::Select, ButtonId::Start]);
        assert!(profile.chord_for(&set).is_some());
    }

    #[test]
    fn file_profile_resolves() {
        let raw = r#"
            name = "test"

            [bindings.a]
            press = { kind = "key", key = "enter" }

            [bindings.y]
            double_tap = { kind = "key", key = "tab", modifiers = ["alt"] }

            [layers.nav.bindings.dpad_up]
            press = { kind = "key", key = "pageup" }

            [layer_activators]
            left_bumper = "nav"

            [[chords]]
            buttons = ["start", "select"]
            action = { kind = "system_command", command = "lock" }

            [[sequences]]
            steps = ["dpad_down", "dpad_down", "a"]
            window_ms = 600
            action = { kind = "key", key = "f5" }
        "#;
        let file: ProfileFile = toml::from_str(raw).unwrap();
        let profile = Profile::resolve(file).unwrap();

        assert_eq!(profile.name, "test");
        assert!(profile.base.get(&ButtonId::A).unwrap().press.is_some());
        assert_eq!(profile.layers.len(), 1);
        assert_eq!(
            profile.layer_activators.get(&ButtonId::LeftBumper),
            Some(&"nav".to_string())
        );
        assert_eq!(profile.chords.len(), 1);
        assert_eq!(
            profile.sequences[0].window,
            Duration::from_millis(600)
        );
        assert!(!profile.sequences[0].co_fire);
    }

    #[test]
    fn repeated_single_button_sequence_is_rejected() {
        let raw = r#"
            name = "bad"

            [[sequences]]
            steps = ["a", "a", "a"]
            action = { kind = "key", key = "f1" }
        "#;
        let file: ProfileFile = toml::from_str(raw).unwrap();
        match Profile::resolve(file) {
            Err(ProfileError::InvalidSequence(_)) => {}
            other => panic!("expected InvalidSequence, got {:?}", other.map(|p| p.name)),
        }
    }

    #[test]
    fn unknown_button_is_rejected() {
        let raw = r#"
            name = "bad"

            [bindings.turbo]
            press = { kind = "key", key = "enter" }
        "#;
        let file: ProfileFile = toml::from_str(raw).unwrap();
        assert!(matches!(
            Profile::resolve(file),
            Err(ProfileError::UnknownButton(_))
        ));
    }

    #[test]
    fn sequences_sort_longest_first_with_stable_ties() {
        let raw = r#"
            name = "seq"

            [[sequences]]
            steps = ["a", "b"]
            action = { kind = "key", key = "f1" }

            [[sequences]]
            steps = ["a", "b", "x"]
            action = { kind = "key", key = "f2" }

            [[sequences]]
            steps = ["b", "a"]
            action = { kind = "key", key = "f3" }
        "#;
        let file: ProfileFile = toml::from_str(raw).unwrap();
        let profile = Profile::resolve(file).unwrap();
        assert_eq!(profile.sequences[0].steps.len(), 3);
        // Declaration order preserved among the two 2-step sequences.
        assert_eq!(
            profile.sequences[1].steps,
            vec![ButtonId::A, ButtonId::B]
        );
        assert_eq!(
            profile.sequences[2].steps,
            vec![ButtonId::B, ButtonId::A]
        );
    }
}
