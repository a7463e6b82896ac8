//! Character classification collaborators.
//!
//! The NFA builder and every executor consult two pure functions:
//!
//! - [`classify`]: does a codepoint belong to a character type (`\d`, `\w`, `\s`)
//! - [`PropertyLookup::lookup`]: the codepoint intervals of a named property
//!   (`\p{Greek}`), backed by [`BlockTable`] unless the caller supplies one
//!
//! Character types use ASCII definitions, so the interval table returned by
//! [`CharType::ranges`] agrees exactly with [`classify`] and determinization
//! can treat a type transition as an ordinary alphabet.

use std::fmt;

// =============================================================================
// Character types
// =============================================================================

/// Character type tested by a `Type` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharType {
    Digit,
    Word,
    Space,
}

const DIGIT_RANGES: &[(u32, u32)] = &[(0x30, 0x39)];
const WORD_RANGES: &[(u32, u32)] = &[(0x30, 0x39), (0x41, 0x5A), (0x5F, 0x5F), (0x61, 0x7A)];
const SPACE_RANGES: &[(u32, u32)] = &[(0x09, 0x0D), (0x20, 0x20)];

impl CharType {
    /// Stable identifier passed across the native-code boundary.
    pub fn id(self) -> u8 {
        match self {
            CharType::Digit => 0,
            CharType::Word => 1,
            CharType::Space => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<CharType> {
        match id {
            0 => Some(CharType::Digit),
            1 => Some(CharType::Word),
            2 => Some(CharType::Space),
            _ => None,
        }
    }

    /// Escape letter of the type (`d`, `w`, `s`).
    pub fn escape(self) -> char {
        match self {
            CharType::Digit => 'd',
            CharType::Word => 'w',
            CharType::Space => 's',
        }
    }

    pub fn from_escape(c: char) -> Option<CharType> {
        match c {
            'd' => Some(CharType::Digit),
            'w' => Some(CharType::Word),
            's' => Some(CharType::Space),
            _ => None,
        }
    }

    /// Sorted, merged intervals accepted by the type.
    pub fn ranges(self) -> &'static [(u32, u32)] {
        match self {
            CharType::Digit => DIGIT_RANGES,
            CharType::Word => WORD_RANGES,
            CharType::Space => SPACE_RANGES,
        }
    }
}

impl fmt::Display for CharType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\\{}", self.escape())
    }
}

/// Classifier used by every executor for `Type` tests.
#[inline]
pub fn classify(cp: u32, class: CharType) -> bool {
    match class {
        CharType::Digit => (0x30..=0x39).contains(&cp),
        CharType::Word => {
            (0x30..=0x39).contains(&cp)
                || (0x41..=0x5A).contains(&cp)
                || cp == 0x5F
                || (0x61..=0x7A).contains(&cp)
        }
        CharType::Space => (0x09..=0x0D).contains(&cp) || cp == 0x20,
    }
}

// =============================================================================
// Property lookup
// =============================================================================

/// Named codepoint properties for `\p{..}` and `\P{..}`.
pub trait PropertyLookup {
    /// Sorted intervals of the property, or `None` when the name is unknown.
    fn lookup(&self, name: &str) -> Option<Vec<(u32, u32)>>;
}

/// Unicode block table. Accepts block names with or without an `Is`/`In`
/// prefix, ignoring spaces, hyphens and underscores.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockTable;

impl PropertyLookup for BlockTable {
    fn lookup(&self, name: &str) -> Option<Vec<(u32, u32)>> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect();
        let key = normalized
            .strip_prefix("Is")
            .or_else(|| normalized.strip_prefix("In"))
            .unwrap_or(&normalized);

        let ranges: &[(u32, u32)] = match key {
            "ASCII" | "BasicLatin" => &[(0x0000, 0x007F)],
            "Latin1Supplement" => &[(0x0080, 0x00FF)],
            "LatinExtendedA" => &[(0x0100, 0x017F)],
            "LatinExtendedB" => &[(0x0180, 0x024F)],
            "IPAExtensions" => &[(0x0250, 0x02AF)],
            "SpacingModifierLetters" => &[(0x02B0, 0x02FF)],
            "CombiningDiacriticalMarks" => &[(0x0300, 0x036F)],
            "Greek" | "GreekandCoptic" => &[(0x0370, 0x03FF)],
            "Cyrillic" => &[(0x0400, 0x04FF)],
            "Armenian" => &[(0x0530, 0x058F)],
            "Hebrew" => &[(0x0590, 0x05FF)],
            "Arabic" => &[(0x0600, 0x06FF)],
            "Syriac" => &[(0x0700, 0x074F)],
            "Thaana" => &[(0x0780, 0x07BF)],
            "Devanagari" => &[(0x0900, 0x097F)],
            "Bengali" => &[(0x0980, 0x09FF)],
            "Gurmukhi" => &[(0x0A00, 0x0A7F)],
            "Gujarati" => &[(0x0A80, 0x0AFF)],
            "Tamil" => &[(0x0B80, 0x0BFF)],
            "Thai" => &[(0x0E00, 0x0E7F)],
            "Lao" => &[(0x0E80, 0x0EFF)],
            "Tibetan" => &[(0x0F00, 0x0FFF)],
            "Georgian" => &[(0x10A0, 0x10FF)],
            "HangulJamo" => &[(0x1100, 0x11FF)],
            "LatinExtendedAdditional" => &[(0x1E00, 0x1EFF)],
            "GreekExtended" => &[(0x1F00, 0x1FFF)],
            "GeneralPunctuation" => &[(0x2000, 0x206F)],
            "SuperscriptsandSubscripts" => &[(0x2070, 0x209F)],
            "CurrencySymbols" => &[(0x20A0, 0x20CF)],
            "LetterlikeSymbols" => &[(0x2100, 0x214F)],
            "NumberForms" => &[(0x2150, 0x218F)],
            "Arrows" => &[(0x2190, 0x21FF)],
            "MathematicalOperators" => &[(0x2200, 0x22FF)],
            "BoxDrawing" => &[(0x2500, 0x257F)],
            "GeometricShapes" => &[(0x25A0, 0x25FF)],
            "MiscellaneousSymbols" => &[(0x2600, 0x26FF)],
            "Dingbats" => &[(0x2700, 0x27BF)],
            "CJKSymbolsandPunctuation" => &[(0x3000, 0x303F)],
            "Hiragana" => &[(0x3040, 0x309F)],
            "Katakana" => &[(0x30A0, 0x30FF)],
            "CJKUnifiedIdeographs" => &[(0x4E00, 0x9FFF)],
            "HangulSyllables" => &[(0xAC00, 0xD7AF)],
            "PrivateUseArea" | "PrivateUse" => &[(0xE000, 0xF8FF)],
            "AlphabeticPresentationForms" => &[(0xFB00, 0xFB4F)],
            "HalfwidthandFullwidthForms" => &[(0xFF00, 0xFFEF)],
            "Emoticons" => &[(0x1F600, 0x1F64F)],
            _ => return None,
        };
        Some(ranges.to_vec())
    }
}
