//! Pitch spelling: `step` + up to two accidentals + octave, e.g. `C#4`, `Bb3`, `F##5`, `Cb-1`.

use std::fmt;

use crate::error::{Result, ScoreError};

/// Spelling used when a generator turns a pitch class back into a name.
/// Semitone 1 is always `C#`, 3 always `Eb`, and so on.
pub const SEMITONE_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// A parsed pitch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pitch {
    /// Note name: A–G
    pub step: char,
    /// Chromatic alteration in semitones (-2..=2)
    pub alter: i8,
    /// Octave number (middle C = C4)
    pub octave: i32,
}

impl Pitch {
    /// Parse a spelled pitch. Accidentals must not mix `#` and `b`.
    pub fn parse(text: &str) -> Result<Pitch> {
        let bad = || ScoreError::PitchSyntax { pitch: text.to_string() };
        let mut chars = text.chars().peekable();

        let step = match chars.next() {
            Some(c @ 'A'..='G') => c,
            _ => return Err(bad()),
        };

        let mut alter: i8 = 0;
        let mut accidentals = 0;
        let mut last = None;
        while let Some(&c) = chars.peek() {
            if c != '#' && c != 'b' {
                break;
            }
            if last.is_some_and(|prev| prev != c) || accidentals == 2 {
                return Err(bad());
            }
            alter += if c == '#' { 1 } else { -1 };
            accidentals += 1;
            last = Some(c);
            chars.next();
        }

        let rest: String = chars.collect();
        let digits = rest.strip_prefix('-').unwrap_or(&rest);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        let octave: i32 = rest.parse().map_err(|_| bad())?;

        Ok(Pitch { step, alter, octave })
    }

    /// Whether `text` follows the spelling grammar.
    pub fn is_valid(text: &str) -> bool {
        Pitch::parse(text).is_ok()
    }

    /// MIDI note number; middle C (C4) = 60. May fall outside 0..=127.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.step {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            _ => 11,
        };
        (self.octave + 1) * 12 + step_semitone + self.alter as i32
    }

    /// Spell a MIDI note number with [`SEMITONE_NAMES`].
    pub fn name_for_midi(midi: i32) -> String {
        let class = midi.rem_euclid(12) as usize;
        format!("{}{}", SEMITONE_NAMES[class], midi.div_euclid(12) - 1)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accidental = match self.alter {
            2 => "##",
            1 => "#",
            -1 => "b",
            -2 => "bb",
            _ => "",
        };
        write!(f, "{}{}{}", self.step, accidental, self.octave)
    }
}

/// MIDI note number of a spelled pitch string.
pub fn pitch_to_midi(text: &str) -> Result<i32> {
    Ok(Pitch::parse(text)?.to_midi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spellings() {
        assert_eq!(Pitch::parse("C4").unwrap(), Pitch { step: 'C', alter: 0, octave: 4 });
        assert_eq!(Pitch::parse("C#4").unwrap().alter, 1);
        assert_eq!(Pitch::parse("Bb3").unwrap().alter, -1);
        assert_eq!(Pitch::parse("F##5").unwrap().alter, 2);
        assert_eq!(Pitch::parse("Ebb2").unwrap().alter, -2);
        assert_eq!(Pitch::parse("Cb-1").unwrap().octave, -1);
    }

    #[test]
    fn rejects_malformed() {
        for text in ["", "H4", "c4", "C", "C#", "C###4", "C#b4", "Cmaj7", "C4x", "C-", "51", "Kick"] {
            assert!(
                matches!(Pitch::parse(text), Err(ScoreError::PitchSyntax { .. })),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn midi_numbers() {
        assert_eq!(pitch_to_midi("C4").unwrap(), 60);
        assert_eq!(pitch_to_midi("A4").unwrap(), 69);
        assert_eq!(pitch_to_midi("C#4").unwrap(), 61);
        assert_eq!(pitch_to_midi("Cb4").unwrap(), 59);
        assert_eq!(pitch_to_midi("C2").unwrap(), 36);
        assert_eq!(pitch_to_midi("C-1").unwrap(), 0);
    }

    #[test]
    fn generator_spelling() {
        assert_eq!(Pitch::name_for_midi(61), "C#4");
        assert_eq!(Pitch::name_for_midi(63), "Eb4");
        assert_eq!(Pitch::name_for_midi(36), "C2");
        assert_eq!(Pitch::name_for_midi(70), "Bb4");
        assert_eq!(pitch_to_midi(&Pitch::name_for_midi(47)).unwrap(), 47);
    }
}
