//! Modul für Profile, Bindings und die Auflösung effektiver Mappings.
//!
//! Dieses Modul definiert den geschlossenen Aktions-Summentyp, die
//! Profil-Datenstrukturen (Basis-Bindings, Ebenen, Chords, Sequenzen) und
//! die reine Auflösungslogik mit Ebenen-Fallthrough. Die Engine liest
//! Profile ausschließlich als unveränderlichen Snapshot.

pub mod error;
pub mod profile;
pub mod resolve;

// Re-exports für einfacheren Zugriff
pub use error::ProfileError;
pub use profile::{Binding, ChordDef, Layer, Profile, SequenceDef, StickMode, TouchBindings};
pub use resolve::{effective_binding, LayerStack};

use serde::{Deserialize, Serialize};

/// Modifier für Tasten-Aktionen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Shift,
    Ctrl,
    Alt,
    Meta,
}

/// Maustasten, die eine Aktion auslösen kann
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButtonKind {
    Left,
    Right,
    Middle,
}

/// Auszuführende Aktion - geschlossener Summentyp, der vom Output Sink
/// konsumiert wird. Die Engine behandelt Aktionen als opak; nur der Sink
/// kennt ihre konkrete Bedeutung.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Tastatur-Taste mit optionalen Modifiern
    Key {
        key: String,
        #[serde(default)]
        modifiers: Vec<Modifier>,
    },
    /// Maustasten-Klick
    MouseButton { button: MouseButtonKind },
    /// Makro: Folge von Tasten-Namen, als Einheit ausgeführt
    Macro { steps: Vec<String> },
    /// Opaker System-Befehl, ausgeführt vom externen Executor
    SystemCommand { command: String },
    /// Opakes Skript, ausgeführt von der externen Sandbox
    Script { script: String },
}
