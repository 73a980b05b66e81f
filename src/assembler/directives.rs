//! Expansion of the `data` directive into words
//!
//! A `data` line carries a comma-separated element list. Each element is
//! either a string literal, emitting one word per rune, or
//! `([SIZE])? (VALUE | unif MAX)?` with SIZE defaulting to 1 and VALUE to
//! 0; `unif MAX` draws SIZE independent samples in `[0, MAX]`.

use crate::assembler::statement::{
    parse_quoted_string, parse_word_literal, SourceLocation,
};
use crate::assembler::{Error, LinePatterns};
use crate::rng::Rng;

pub(crate) fn expand_data_list(
    list: &str,
    location: &SourceLocation,
    patterns: &LinePatterns,
    rng: &mut Rng,
) -> Result<Vec<u32>, Error> {
    let mut words = Vec::new();
    // a trailing comma terminates every element uniformly
    let mut remaining = format!("{list},");

    for element_number in 1u64.. {
        if remaining.is_empty() {
            break;
        }
        let invalid = |detail: String| Error::InvalidDataElement {
            detail,
            element_number,
            location: location.clone(),
        };

        let Some(captures) = patterns.data_element.captures(&remaining) else {
            return Err(invalid(format!("incomprehensible trunk: {remaining}")));
        };
        let element = captures.name("elt").map_or("", |m| m.as_str());
        let size = captures.name("size").map_or("1", |m| m.as_str());
        let value = captures.name("value").map_or("", |m| m.as_str());
        let rest = captures.name("rest").map_or("", |m| m.as_str()).to_string();

        if element.is_empty() {
            return Err(invalid("empty element".to_string()));
        }

        if element.starts_with('"') {
            let runes = parse_quoted_string(element).ok_or_else(|| Error::BadStringLiteral {
                literal: element.to_string(),
                location: location.clone(),
            })?;
            words.extend(runes);
        } else {
            let size = parse_word_literal(size)
                .ok_or_else(|| invalid(format!("invalid element size: {size}")))?;
            if let Some(unif) = patterns.unif.captures(value) {
                let max = parse_word_literal(&unif[1])
                    .ok_or_else(|| invalid(format!("invalid unif range value: {}", &unif[1])))?;
                for _ in 0..size {
                    words.push(rng.unif(max));
                }
            } else {
                let word = if value.is_empty() {
                    0
                } else {
                    parse_word_literal(value)
                        .ok_or_else(|| invalid(format!("invalid element value: {value}")))?
                };
                for _ in 0..size {
                    words.push(word);
                }
            }
        }

        remaining = rest;
    }

    Ok(words)
}
