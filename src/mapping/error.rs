//! Fehlerdefinitionen für das Mapping-Modul

use thiserror::Error;

/// Fehlertypen für Profile und Mapping-Auflösung
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Fehler bei der Konfiguration eines Profils
    #[error("Konfigurationsfehler: {0}")]
    ConfigError(String),

    /// Der Button-Name ist nicht bekannt
    #[error("Unbekannter Button: {0}")]
    UnknownButton(String),

    /// Die referenzierte Ebene existiert nicht
    #[error("Unbekannte Ebene: {0}")]
    UnknownLayer(String),

    /// Sequenz ist mehrdeutig (z.B. nur ein wiederholter Button)
    #[error("Ungültige Sequenz: {0}")]
    InvalidSequence(String),

    /// Fehler beim Lesen der Profildatei
    #[error("Fehler beim Lesen der Profildatei: {0}")]
    Io(#[from] std::io::Error),

    /// Fehler beim Parsen der Profildatei
    #[error("Fehler beim Parsen der Profildatei: {0}")]
    Parse(#[from] toml::de::Error),
}
