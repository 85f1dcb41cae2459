//! Query/document alignment scores and their reading-order rendering.
//!
//! A [`HeatMap`] records, for pairs of query-token span and document-token
//! span, the best similarity seen between them. [`merge_spans`] turns one
//! document's heat map into a sequence of non-overlapping fragments that
//! tile the document text, ready to be drawn.

use std::collections::{BTreeMap, btree_map::Entry};

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::records::Span;

/// Highlights kept per query token; the rest are zeroed.
const TOP_PER_QUERY_TOKEN: usize = 3;

/// Number of distinct hues before lanes wrap around.
const HUE_LANES: usize = 16;

/// Key of a heat-map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Alignment {
    pub query: Span,
    pub document: Span,
}

impl Alignment {
    pub fn new(query: Span, document: Span) -> Self {
        Self { query, document }
    }
}

/// Sparse map from (query span, document span) to similarity.
///
/// Serializes as a JSON object with `"qStart:qEnd:dStart:dEnd"` keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatMap {
    entries: BTreeMap<Alignment, f32>,
}

impl HeatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a score for the pair, keeping the maximum on repeats.
    pub fn record(&mut self, query: Span, document: Span, score: f32) {
        match self.entries.entry(Alignment::new(query, document)) {
            Entry::Vacant(slot) => {
                slot.insert(score);
            }
            Entry::Occupied(mut slot) => {
                if score > *slot.get() {
                    slot.insert(score);
                }
            }
        }
    }

    pub fn get(&self, query: Span, document: Span) -> Option<f32> {
        self.entries.get(&Alignment::new(query, document)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by query span, then document span.
    pub fn iter(&self) -> impl Iterator<Item = (Alignment, f32)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}

impl Serialize for HeatMap {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, score) in &self.entries {
            let key = format!(
                "{}:{}:{}:{}",
                key.query.start, key.query.end, key.document.start, key.document.end
            );
            map.serialize_entry(&key, score)?;
        }
        map.end()
    }
}

/// Background color for a highlight, as HSL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    /// Degrees, `0.0..360.0`.
    pub hue: f32,
    /// Percent.
    pub saturation: f32,
    /// Percent.
    pub lightness: f32,
}

impl Hsl {
    /// Lane hue at fixed saturation; lightness falls from 100% at score 0
    /// to 70% at score 1.
    pub fn for_highlight(lane: usize, score: f32) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            hue: (lane % HUE_LANES) as f32 * 360.0 / HUE_LANES as f32,
            saturation: 85.0,
            lightness: 100.0 - score * 30.0,
        }
    }
}

impl std::fmt::Display for Hsl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hsl({}, {}%, {}%)",
            self.hue, self.saturation, self.lightness
        )
    }
}

/// One piece of the rendered document, in reading order.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Unhighlighted text, emitted verbatim.
    Text(Span),
    /// An interstitial run containing a line break, drawn as one newline.
    LineBreak(Span),
    Highlight {
        span: Span,
        score: f32,
        /// Index of the query token in ascending query-offset order.
        lane: usize,
        color: Hsl,
    },
}

impl Fragment {
    /// The document bytes this fragment stands for.
    pub fn span(&self) -> Span {
        match self {
            Fragment::Text(span) | Fragment::LineBreak(span) => *span,
            Fragment::Highlight { span, .. } => *span,
        }
    }
}

/// Entries for one query token after capping.
#[derive(Debug, Clone)]
struct TokenGroup {
    lane: usize,
    /// Document spans ascending by start, with capped scores.
    entries: Vec<(Span, f32)>,
}

/// Group entries by query span, keep only the top scores of each group,
/// and assign lanes by ascending query span.
fn capped_groups(heat_map: &HeatMap) -> Vec<TokenGroup> {
    let mut by_query: BTreeMap<Span, Vec<(Span, f32)>> = BTreeMap::new();
    for (key, score) in heat_map.iter() {
        by_query.entry(key.query).or_default().push((key.document, score));
    }

    by_query
        .into_values()
        .enumerate()
        .map(|(lane, mut entries)| {
            entries.sort_by(|a, b| b.1.total_cmp(&a.1));
            for entry in entries.iter_mut().skip(TOP_PER_QUERY_TOKEN) {
                entry.1 = 0.0;
            }
            entries.sort_by_key(|(span, _)| span.start);
            TokenGroup { lane, entries }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Representative {
    span: Span,
    score: f32,
    lane: usize,
}

/// Produce the reading-order rendering of `text` highlighted by
/// `heat_map`.
///
/// At each document start offset the highest-scoring entry wins (first
/// seen on ties). Highlights never overlap: one that starts inside the
/// previous highlight is clipped to begin where it ends, and dropped if
/// nothing remains. A gap between highlights that contains a line break
/// collapses to a single [`Fragment::LineBreak`]; other gaps are kept as
/// text. Text after the last highlight is kept verbatim. Fragments tile
/// `[0, text.len())` and offsets are snapped to character boundaries.
pub fn merge_spans(heat_map: &HeatMap, text: &str) -> Vec<Fragment> {
    let mut by_start: BTreeMap<usize, Representative> = BTreeMap::new();
    for group in capped_groups(heat_map) {
        for (span, score) in group.entries {
            let candidate = Representative {
                span,
                score,
                lane: group.lane,
            };
            match by_start.entry(span.start) {
                Entry::Vacant(slot) => {
                    slot.insert(candidate);
                }
                Entry::Occupied(mut slot) => {
                    if score > slot.get().score {
                        slot.insert(candidate);
                    }
                }
            }
        }
    }

    let mut fragments = Vec::new();
    let mut cursor = 0;
    for rep in by_start.into_values() {
        let start = floor_boundary(text, rep.span.start).max(cursor);
        let end = floor_boundary(text, rep.span.end);
        if end <= start {
            continue;
        }
        push_gap(&mut fragments, text, cursor, start);
        fragments.push(Fragment::Highlight {
            span: Span::new(start, end),
            score: rep.score,
            lane: rep.lane,
            color: Hsl::for_highlight(rep.lane, rep.score),
        });
        cursor = end;
    }
    if cursor < text.len() {
        fragments.push(Fragment::Text(Span::new(cursor, text.len())));
    }
    fragments
}

fn push_gap(fragments: &mut Vec<Fragment>, text: &str, start: usize, end: usize) {
    if start >= end {
        return;
    }
    let span = Span::new(start, end);
    if text[start..end].contains('\n') {
        fragments.push(Fragment::LineBreak(span));
    } else {
        fragments.push(Fragment::Text(span));
    }
}

fn floor_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}
