//! Discard-count policy for ranked windows.

use crate::model::Clip;

/// How many bottom-ranked clips to drop from a window.
///
/// A window drawn entirely from one video that exceeds the per-video cap
/// is cut down to the cap; any other window loses `floor(len × ratio)`.
/// Windows of two or more clips always lose at least one and keep at least
/// one, so every ranking round strictly shrinks the candidate set.
/// Windows of size 0 or 1 lose nothing (they are never ranked).
pub fn discard_count(window: &[Clip], per_group_cap: usize, discard_ratio: f64) -> usize {
    if window.len() < 2 {
        return 0;
    }
    let single_group = window.iter().all(|c| c.video_id == window[0].video_id);
    let count = if single_group && window.len() > per_group_cap {
        window.len() - per_group_cap
    } else {
        (window.len() as f64 * discard_ratio).floor() as usize
    };
    count.clamp(1, window.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::discard_count;
    use crate::model::Clip;

    fn clip(id: &str, video_id: &str) -> Clip {
        Clip {
            id: id.to_string(),
            video_id: video_id.to_string(),
            video_title: format!("video {}", video_id),
            title: format!("clip {}", id),
            summary: String::new(),
            text: String::new(),
            start_secs: 0,
            end_secs: 10,
            url: String::new(),
            cost: 1,
        }
    }

    fn window(specs: &[(&str, &str)]) -> Vec<Clip> {
        specs.iter().map(|(id, vid)| clip(id, vid)).collect()
    }

    #[test]
    fn test_single_group_over_cap_discards_to_cap() {
        let w = window(&[
            ("a", "v1"),
            ("b", "v1"),
            ("c", "v1"),
            ("d", "v1"),
            ("e", "v1"),
            ("f", "v1"),
            ("g", "v1"),
            ("h", "v1"),
            ("i", "v1"),
        ]);
        assert_eq!(discard_count(&w, 3, 0.5), 6);
    }

    #[test]
    fn test_single_group_under_cap_uses_ratio() {
        let w = window(&[("a", "v1"), ("b", "v1"), ("c", "v1")]);
        assert_eq!(discard_count(&w, 3, 0.5), 1);
    }

    #[test]
    fn test_mixed_groups_use_ratio() {
        let w = window(&[
            ("a", "v1"),
            ("b", "v2"),
            ("c", "v1"),
            ("d", "v3"),
            ("e", "v2"),
            ("f", "v3"),
            ("g", "v1"),
            ("h", "v2"),
        ]);
        assert_eq!(discard_count(&w, 3, 0.5), 4);
    }

    #[test]
    fn test_minimum_one_discard_for_rankable_windows() {
        // A tiny ratio would floor to zero; the policy still drops one.
        let w = window(&[("a", "v1"), ("b", "v2")]);
        assert_eq!(discard_count(&w, 3, 0.1), 1);
    }

    #[test]
    fn test_at_least_one_survivor() {
        let w = window(&[("a", "v1"), ("b", "v2")]);
        assert_eq!(discard_count(&w, 3, 0.99), 1);
    }

    #[test]
    fn test_degenerate_windows_discard_nothing() {
        assert_eq!(discard_count(&[], 3, 0.5), 0);
        assert_eq!(discard_count(&window(&[("a", "v1")]), 3, 0.5), 0);
    }
}
