use crate::models::{ContentStats, Scores};

pub const AI_WEIGHT: f64 = 0.7;
pub const HEURISTIC_WEIGHT: f64 = 0.3;

pub const KEYWORD_BASELINE: f64 = 70.0;
pub const READABILITY_BASELINE: f64 = 75.0;

/// Structure-only scores, computed without the model.
pub fn heuristic_scores(stats: &ContentStats) -> Scores {
    let title = title_score(stats.title_length);
    let content = content_score(stats.word_count);
    let keyword = KEYWORD_BASELINE;
    let readability = READABILITY_BASELINE;
    Scores {
        overall: title * 0.25 + content * 0.35 + keyword * 0.25 + readability * 0.15,
        title,
        content,
        keyword,
        readability,
    }
}

pub fn title_score(len: u32) -> f64 {
    match len {
        30..=60 => 85.0,
        20..=29 | 61..=70 => 70.0,
        0 => 0.0,
        _ => 50.0,
    }
}

pub fn content_score(words: u32) -> f64 {
    match words {
        1000.. => 85.0,
        600..=999 => 75.0,
        300..=599 => 65.0,
        100..=299 => 50.0,
        _ => 30.0,
    }
}

/// `round(ai * 0.7 + heuristic * 0.3, 1)`, per dimension.
pub fn blend(ai: &Scores, heuristic: &Scores) -> Scores {
    Scores {
        overall: blend_one(ai.overall, heuristic.overall),
        title: blend_one(ai.title, heuristic.title),
        content: blend_one(ai.content, heuristic.content),
        keyword: blend_one(ai.keyword, heuristic.keyword),
        readability: blend_one(ai.readability, heuristic.readability),
    }
}

pub fn blend_one(ai: f64, heuristic: f64) -> f64 {
    round1(ai * AI_WEIGHT + heuristic * HEURISTIC_WEIGHT)
}

/// Half away from zero at one decimal. The scaled value is snapped to 9
/// fractional digits first so `78.44999999999999` still counts as a tie.
pub fn round1(x: f64) -> f64 {
    let scaled = ((x * 10.0) * 1e9).round() / 1e9;
    scaled.round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(title_length: u32, word_count: u32) -> ContentStats {
        ContentStats {
            title_length,
            word_count,
            ..ContentStats::default()
        }
    }

    #[test]
    fn title_bands() {
        assert_eq!(title_score(45), 85.0);
        assert_eq!(title_score(30), 85.0);
        assert_eq!(title_score(60), 85.0);
        assert_eq!(title_score(25), 70.0);
        assert_eq!(title_score(65), 70.0);
        assert_eq!(title_score(5), 50.0);
        assert_eq!(title_score(120), 50.0);
        assert_eq!(title_score(0), 0.0);
    }

    #[test]
    fn word_count_tiers() {
        assert_eq!(content_score(1200), 85.0);
        assert_eq!(content_score(700), 75.0);
        assert_eq!(content_score(300), 65.0);
        assert_eq!(content_score(150), 50.0);
        assert_eq!(content_score(10), 30.0);
    }

    #[test]
    fn ideal_article_heuristics() {
        let h = heuristic_scores(&stats(45, 1200));
        assert_eq!(h.title, 85.0);
        assert_eq!(h.content, 85.0);
        assert!((h.overall - 79.75).abs() < 1e-9);
    }

    #[test]
    fn blends_seventy_thirty() {
        let h = heuristic_scores(&stats(45, 1200));
        let ai = Scores {
            overall: 90.0,
            ..Scores::uniform(70.0)
        };
        let blended = blend(&ai, &h);
        assert_eq!(blended.overall, 86.9);
        assert_eq!(blended.title, 74.5);
        assert_eq!(blended.readability, 71.5);
    }

    #[test]
    fn blend_stays_in_bounds() {
        for ai in (0..=100).step_by(5) {
            for heuristic in (0..=100).step_by(5) {
                let (ai, heuristic) = (ai as f64, heuristic as f64);
                let b = blend_one(ai, heuristic);
                assert!((0.0..=100.0).contains(&b));
                // integer inputs land exactly on tenths
                let tenths = 7.0 * ai + 3.0 * heuristic;
                assert_eq!(b, tenths / 10.0);
            }
        }
        assert_eq!(blend_one(100.0, 100.0), 100.0);
        assert_eq!(blend_one(0.0, 0.0), 0.0);
    }

    #[test]
    fn ties_round_half_up() {
        // empty title, 300-599 words
        let h = heuristic_scores(&stats(0, 450));
        assert!((h.overall - 51.5).abs() < 1e-9);
        assert_eq!(blend_one(90.0, 51.5), 78.5);
        // ideal title, under 100 words
        assert!((heuristic_scores(&stats(40, 20)).overall - 60.5).abs() < 1e-9);
        assert_eq!(blend_one(85.0, 60.5), 77.7);
        assert_eq!(round1(86.925), 86.9);
        assert_eq!(round1(0.05), 0.1);
    }
}
