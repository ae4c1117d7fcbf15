//! Sentence segmentation for paced result delivery.

/// Characters that end a sentence, ASCII and full-width.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

fn is_terminator(c: char) -> bool {
    SENTENCE_TERMINATORS.contains(&c)
}

/// Splits `text` into sentence segments.
///
/// Each segment keeps its terminator, is trimmed of surrounding whitespace,
/// and empty segments are dropped. Trailing text without a terminator forms
/// the last segment. Order is preserved.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if is_terminator(c) {
            let end = idx + c.len_utf8();
            push_trimmed(&mut segments, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut segments, &text[start..]);
    segments
}

fn push_trimmed(segments: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_full_width_terminators_in_order() {
        assert_eq!(
            split_sentences("图中是一只狗。它很可爱！"),
            vec!["图中是一只狗。", "它很可爱！"]
        );
    }

    #[test]
    fn keeps_unterminated_tail_and_trims_whitespace() {
        assert_eq!(
            split_sentences("  A dog.  Is it cute?   yes "),
            vec!["A dog.", "Is it cute?", "yes"]
        );
    }

    #[test]
    fn bare_terminators_survive_and_blank_input_yields_nothing() {
        assert_eq!(split_sentences("真的吗？！ 。"), vec!["真的吗？", "！", "。"]);
        assert_eq!(split_sentences("   "), Vec::<String>::new());
    }

    #[test]
    fn segments_reassemble_to_original_modulo_whitespace() {
        let text = "第一句。 Second one! 第三句？tail";
        let joined: String = split_sentences(text).concat();
        let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(joined.replace(' ', ""), stripped);
    }
}
