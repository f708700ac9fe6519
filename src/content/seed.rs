//! Initial dataset written when a backend holds no snapshot yet

use chrono::{DateTime, Utc};

use super::{Character, Entry, Word};

const WORDS: &[(&str, &str, &str, &str)] = &[
    ("mui", "chakma", "I, myself", "pronoun"),
    ("pani", "chakma", "water", "noun"),
    ("bhat", "chakma", "cooked rice", "noun"),
    ("ghar", "chakma", "house", "noun"),
    ("jana", "chakma", "to know", "verb"),
];

const CHARACTERS: &[(&str, &str, &str, &str)] = &[
    ("\u{11103}", "aa", "a", "vowel"),
    ("\u{11104}", "i", "i", "vowel"),
    ("\u{11105}", "u", "u", "vowel"),
    ("\u{11107}", "kaa", "ka", "consonant"),
    ("\u{11108}", "khaa", "kha", "consonant"),
    ("\u{11109}", "gaa", "ga", "consonant"),
    ("\u{11136}", "zero", "0", "numeral"),
];

pub fn words(now: DateTime<Utc>) -> Vec<Entry<Word>> {
    WORDS
        .iter()
        .map(|(term, language, definition, part_of_speech)| {
            let mut word = Word::new(*term, *language);
            word.definition = Some((*definition).to_string());
            word.part_of_speech = Some((*part_of_speech).to_string());
            Entry::create(word, now)
        })
        .collect()
}

pub fn characters(now: DateTime<Utc>) -> Vec<Entry<Character>> {
    CHARACTERS
        .iter()
        .map(|(symbol, name, romanization, category)| {
            let mut character = Character::new(*symbol, *name);
            character.romanization = Some((*romanization).to_string());
            character.category = Some((*category).to_string());
            Entry::create(character, now)
        })
        .collect()
}
