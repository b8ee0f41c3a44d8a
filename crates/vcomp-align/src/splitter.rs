//! Deterministic transcript span splitting.
//!
//! Splits a transcript into display-sized spans: 3-7 words and at most 35
//! characters each, never breaking inside a word. The same rules double as
//! the validator/repairer for LLM-produced splits, so downstream code only
//! ever sees rule-conforming spans.

use crate::types::SpanRules;

/// Split a transcript into display spans.
pub fn split_transcript(content: &str, rules: &SpanRules) -> Vec<String> {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut spans: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in words {
        let added_len = if current.is_empty() {
            word.chars().count()
        } else {
            current_len + 1 + word.chars().count()
        };

        let over_chars = added_len > rules.max_chars && !current.is_empty();
        let over_words = current.len() >= rules.max_words;

        if over_chars || over_words {
            spans.push(current.join(" "));
            current = vec![word];
            current_len = word.chars().count();
            continue;
        }

        current.push(word);
        current_len = added_len;

        // Sentence punctuation is a natural break once the span is big enough.
        if current.len() >= rules.min_words + 1 && ends_sentence(word) {
            spans.push(current.join(" "));
            current = Vec::new();
            current_len = 0;
        }
    }

    if !current.is_empty() {
        spans.push(current.join(" "));
    }

    merge_short_tail(spans, rules)
}

/// Validate spans produced elsewhere (typically the LLM) and repair any
/// that break the rules. The joined text is preserved word for word.
pub fn repair_spans(spans: Vec<String>, rules: &SpanRules) -> Vec<String> {
    let mut repaired: Vec<String> = Vec::new();

    for span in spans {
        let trimmed = span.trim();
        if trimmed.is_empty() {
            continue;
        }
        if conforms(trimmed, rules) {
            repaired.push(trimmed.to_string());
        } else {
            // Over-long spans re-enter the deterministic splitter.
            repaired.extend(split_transcript(trimmed, rules));
        }
    }

    merge_short_tail(repaired, rules)
}

/// True when every span satisfies the display rules.
pub fn spans_conform(spans: &[String], rules: &SpanRules) -> bool {
    spans.iter().all(|s| conforms(s, rules))
}

fn conforms(span: &str, rules: &SpanRules) -> bool {
    let chars = span.chars().count();
    let words = span.split_whitespace().count();
    // A single word over the char limit cannot be split further; accept it.
    chars <= rules.max_chars && words <= rules.max_words && words >= 1
        || words == 1
}

fn ends_sentence(word: &str) -> bool {
    word.ends_with('.') || word.ends_with('!') || word.ends_with('?') || word.ends_with(';')
}

/// Merge a trailing single-word span into its predecessor when the merged
/// span still conforms; otherwise rebalance one word backwards.
fn merge_short_tail(mut spans: Vec<String>, rules: &SpanRules) -> Vec<String> {
    while spans.len() >= 2 {
        let last_words = spans.last().map(|s| s.split_whitespace().count()).unwrap_or(0);
        if last_words >= rules.min_words {
            break;
        }

        let last = spans.pop().unwrap_or_default();
        let prev = spans.pop().unwrap_or_default();

        let merged = format!("{} {}", prev, last);
        if conforms(&merged, rules) {
            spans.push(merged);
            break;
        }

        // Move the last word of the previous span down instead.
        let mut prev_words: Vec<&str> = prev.split_whitespace().collect();
        if prev_words.len() > rules.min_words {
            let moved = prev_words.pop().unwrap_or_default();
            spans.push(prev_words.join(" "));
            spans.push(format!("{} {}", moved, last));
        } else {
            spans.push(prev);
            spans.push(last);
        }
        break;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SpanRules {
        SpanRules::default()
    }

    fn assert_all_conform(spans: &[String]) {
        for span in spans {
            let chars = span.chars().count();
            let words = span.split_whitespace().count();
            assert!(
                chars <= 35 || words == 1,
                "span too long ({} chars): '{}'",
                chars,
                span
            );
            assert!(words <= 7, "span has {} words: '{}'", words, span);
        }
    }

    #[test]
    fn test_short_transcript_single_span() {
        let spans = split_transcript("Hello world foo", &rules());
        assert_eq!(spans, vec!["Hello world foo"]);
    }

    #[test]
    fn test_word_order_preserved() {
        let text = "The quick brown fox jumps over the lazy dog and keeps on running far away";
        let spans = split_transcript(text, &rules());
        assert_all_conform(&spans);
        assert_eq!(spans.join(" "), text);
    }

    #[test]
    fn test_char_limit_respected() {
        let text = "supercalifragilistic expialidocious words are tremendously lengthy indeed";
        let spans = split_transcript(text, &rules());
        assert_all_conform(&spans);
    }

    #[test]
    fn test_sentence_break_preferred() {
        let spans = split_transcript("This is a sentence. And another one follows here", &rules());
        assert!(spans[0].ends_with('.'), "expected sentence break: {:?}", spans);
    }

    #[test]
    fn test_no_single_word_tail() {
        // 8 words: naive split by max_words would leave a 1-word tail.
        let text = "one two three four five six seven eight";
        let spans = split_transcript(text, &rules());
        assert_all_conform(&spans);
        let last_words = spans.last().unwrap().split_whitespace().count();
        assert!(last_words >= 2, "tail too short: {:?}", spans);
        assert_eq!(spans.join(" "), text);
    }

    #[test]
    fn test_compound_words_never_broken() {
        let text = "state-of-the-art machine-learning pipelines work well together";
        let spans = split_transcript(text, &rules());
        for span in &spans {
            for word in span.split_whitespace() {
                assert!(text.contains(word));
            }
        }
        assert_eq!(spans.join(" "), text);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_transcript("", &rules()).is_empty());
        assert!(split_transcript("   ", &rules()).is_empty());
    }

    #[test]
    fn test_repair_overlong_llm_span() {
        let bad = vec![
            "this span is fine".to_string(),
            "this llm span is far too long and must be split into pieces".to_string(),
        ];
        let repaired = repair_spans(bad, &rules());
        assert_all_conform(&repaired);
        assert!(repaired.len() > 2);
    }

    #[test]
    fn test_repair_drops_empty_spans() {
        let bad = vec!["".to_string(), "  ".to_string(), "keep this one".to_string()];
        let repaired = repair_spans(bad, &rules());
        assert_eq!(repaired, vec!["keep this one"]);
    }

    #[test]
    fn test_spans_conform() {
        assert!(spans_conform(&["two words".to_string()], &rules()));
        assert!(!spans_conform(
            &["way too many words in this single span here now".to_string()],
            &rules()
        ));
    }
}
