use owo_colors::{OwoColorize, Style};

use crate::radio::{AdapterState, BondState};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Tone {
    Heading,
    Good,
    Pending,
    Quiet,
    Emphasis,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Heading => Style::new().cyan().bold(),
            Self::Good => Style::new().green().bold(),
            Self::Pending => Style::new().yellow().bold(),
            Self::Quiet => Style::new().dimmed(),
            Self::Emphasis => Style::new().bold(),
        }
    }
}

/// Colours terminal text, or passes it through untouched when colour is off.
#[derive(Debug)]
pub(crate) struct Painter {
    colour: bool,
}

impl Painter {
    pub(crate) fn new(colour: bool) -> Self {
        Self { colour }
    }

    pub(crate) fn heading(&self, text: impl AsRef<str>) -> String {
        self.tone(Tone::Heading, text)
    }

    pub(crate) fn success(&self, text: impl AsRef<str>) -> String {
        self.tone(Tone::Good, text)
    }

    pub(crate) fn muted(&self, text: impl AsRef<str>) -> String {
        self.tone(Tone::Quiet, text)
    }

    pub(crate) fn address(&self, text: impl AsRef<str>) -> String {
        self.tone(Tone::Emphasis, text)
    }

    pub(crate) fn adapter_state(&self, state: AdapterState) -> String {
        let tone = match state {
            AdapterState::On => Tone::Good,
            AdapterState::Off => Tone::Pending,
            AdapterState::TurningOn | AdapterState::TurningOff => Tone::Quiet,
        };
        self.tone(tone, state.to_string())
    }

    pub(crate) fn bond_state(&self, state: BondState) -> String {
        let tone = match state {
            BondState::Bonded => Tone::Good,
            BondState::Bonding => Tone::Pending,
            BondState::None => Tone::Quiet,
        };
        self.tone(tone, state.to_string())
    }

    fn tone(&self, tone: Tone, text: impl AsRef<str>) -> String {
        let text = text.as_ref();
        if self.colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_owned()
        }
    }
}
