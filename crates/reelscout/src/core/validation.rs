//! Minimum-engagement filter.
//!
//! A video passes when it clears the views threshold OR the likes threshold.
//! A missing metric counts as zero; with no thresholds everything passes.

use crate::core::types::{SourceSpec, VideoDescriptor};

/// Decides whether a descriptor clears the engagement bar.
pub fn keep(descriptor: &VideoDescriptor, min_views: Option<u64>, min_likes: Option<u64>) -> bool {
    let views = descriptor.metrics.views.unwrap_or(0);
    let likes = descriptor.metrics.likes.unwrap_or(0);

    match (min_views, min_likes) {
        (None, None) => true,
        (Some(v), None) => views >= v,
        (None, Some(l)) => likes >= l,
        (Some(v), Some(l)) => views >= v || likes >= l,
    }
}

/// Applies the thresholds of `spec`, preserving order.
pub fn filter(descriptors: Vec<VideoDescriptor>, spec: &SourceSpec) -> Vec<VideoDescriptor> {
    if !spec.has_thresholds() {
        return descriptors;
    }

    let before = descriptors.len();
    let kept: Vec<_> = descriptors
        .into_iter()
        .filter(|d| keep(d, spec.min_views, spec.min_likes))
        .collect();

    if kept.len() < before {
        log::info!(
            "Validator: {} of {} candidates below thresholds (views >= {:?} OR likes >= {:?})",
            before - kept.len(),
            before,
            spec.min_views,
            spec.min_likes
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{EngagementMetrics, SourceKind, StrategyKind};

    fn video(views: Option<u64>, likes: Option<u64>) -> VideoDescriptor {
        VideoDescriptor::from_link("https://www.instagram.com/reel/x/", "x", StrategyKind::DirectHttp).with_metrics(
            EngagementMetrics {
                views,
                likes,
                comments: None,
            },
        )
    }

    #[test]
    fn test_no_thresholds_keeps_everything() {
        assert!(keep(&video(None, None), None, None));
        assert!(keep(&video(Some(0), Some(0)), None, None));
    }

    #[test]
    fn test_likes_alone_can_satisfy_both_thresholds() {
        assert!(keep(&video(Some(0), Some(12_000)), Some(1_000_000), Some(10_000)));
    }

    #[test]
    fn test_below_both_thresholds_is_dropped() {
        assert!(!keep(&video(Some(500), Some(5)), Some(1_000_000), Some(10_000)));
    }

    #[test]
    fn test_missing_metrics_count_as_zero() {
        assert!(!keep(&video(None, None), Some(1), None));
        assert!(keep(&video(None, Some(10)), Some(1_000), Some(10)));
    }

    #[test]
    fn test_single_threshold() {
        assert!(keep(&video(Some(100), None), Some(100), None));
        assert!(!keep(&video(Some(99), Some(1_000_000)), Some(100), None));
        assert!(keep(&video(None, Some(7)), None, Some(7)));
    }

    #[test]
    fn test_monotonic_in_thresholds() {
        let samples = [
            video(Some(0), Some(0)),
            video(Some(5_000), Some(20)),
            video(Some(2_000_000), None),
            video(None, Some(50_000)),
        ];
        let levels = [0u64, 10, 1_000, 100_000, 10_000_000];

        for d in &samples {
            for (i, &v) in levels.iter().enumerate() {
                for &v_hi in &levels[i..] {
                    for (j, &l) in levels.iter().enumerate() {
                        for &l_hi in &levels[j..] {
                            if keep(d, Some(v_hi), Some(l_hi)) {
                                assert!(keep(d, Some(v), Some(l)), "lowering thresholds must not reject");
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_filter_preserves_order() {
        let spec = SourceSpec::builder()
            .kind(SourceKind::Profile)
            .identifier("examplepage")
            .min_likes(10)
            .build();
        let mut a = video(None, Some(50));
        a.post_id = "a".into();
        let mut b = video(None, Some(1));
        b.post_id = "b".into();
        let mut c = video(None, Some(10));
        c.post_id = "c".into();

        let kept: Vec<_> = filter(vec![a, b, c], &spec).into_iter().map(|d| d.post_id).collect();
        assert_eq!(kept, vec!["a", "c"]);
    }
}
