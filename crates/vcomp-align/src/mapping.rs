//! Mapping display spans onto aligned word timestamps.
//!
//! Spans and aligner output both derive from the same transcript, so the
//! deterministic mapper walks both in order, consuming one aligned word per
//! span word. Tokenization drift (punctuation, casing) cannot break the
//! walk because only counts are consumed; text is never re-matched unless
//! both sides agree.

use tracing::debug;

use crate::types::{TimedSpan, WordTimestamp};

/// Derive `[start, end]` windows for spans from aligned word timestamps.
///
/// Every span consumes as many aligned words as it contains; its window is
/// bounded by the first and last of them. When the aligner returned fewer
/// words than the spans contain, the remainder is distributed uniformly
/// over the tail of the audio.
pub fn map_spans_to_words(
    spans: &[String],
    words: &[WordTimestamp],
    total_duration: f64,
) -> Vec<TimedSpan> {
    if spans.is_empty() {
        return Vec::new();
    }
    if words.is_empty() {
        return distribute_uniformly(spans, total_duration, 0.0);
    }

    let mut timed: Vec<TimedSpan> = Vec::new();
    let mut cursor = 0usize;

    for (i, span) in spans.iter().enumerate() {
        let span_words = span.split_whitespace().count().max(1);

        if cursor >= words.len() {
            // Aligner ran short; spread the remaining spans over the tail.
            let tail_start = timed.last().map(|s| s.end).unwrap_or(0.0);
            debug!(
                remaining = spans.len() - i,
                "Aligner returned fewer words than transcript, distributing tail uniformly"
            );
            timed.extend(distribute_uniformly(
                &spans[i..],
                total_duration - tail_start,
                tail_start,
            ));
            return timed;
        }

        let last_index = (cursor + span_words - 1).min(words.len() - 1);
        let start = words[cursor].start;
        let end = words[last_index].end.max(start);
        cursor = last_index + 1;

        timed.push(TimedSpan {
            text: span.clone(),
            start,
            end,
        });
    }

    enforce_monotonic(&mut timed);
    timed
}

/// Uniform time distribution across spans, the alignment-outage fallback.
///
/// Spans are weighted by character count so long lines stay on screen
/// longer, matching reading speed.
pub fn distribute_uniformly(spans: &[String], duration: f64, offset: f64) -> Vec<TimedSpan> {
    if spans.is_empty() || duration <= 0.0 {
        return spans
            .iter()
            .map(|s| TimedSpan {
                text: s.clone(),
                start: offset,
                end: offset,
            })
            .collect();
    }

    let total_chars: usize = spans.iter().map(|s| s.chars().count().max(1)).sum();
    let mut timed = Vec::with_capacity(spans.len());
    let mut position = offset;

    for span in spans {
        let weight = span.chars().count().max(1) as f64 / total_chars as f64;
        let span_duration = duration * weight;
        timed.push(TimedSpan {
            text: span.clone(),
            start: position,
            end: position + span_duration,
        });
        position += span_duration;
    }

    // Absorb floating point drift into the last span.
    if let Some(last) = timed.last_mut() {
        last.end = offset + duration;
    }

    timed
}

/// Clamp windows so spans never overlap and starts are monotonic.
fn enforce_monotonic(spans: &mut [TimedSpan]) {
    for i in 1..spans.len() {
        if spans[i].start < spans[i - 1].end {
            spans[i].start = spans[i - 1].end;
        }
        if spans[i].end < spans[i].start {
            spans[i].end = spans[i].start;
        }
    }
}
