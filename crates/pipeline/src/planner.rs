use serde::{Deserialize, Serialize};
use crate::probe::MediaFile;

/// Conversion policy class assigned by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyClass {
    /// Stream copy into the new container, no re-encoding
    FastRemux,
    /// Re-encode is slow but acceptable
    ModerateReencode,
    /// Too costly or unknown, left for manual review
    Refuse,
}

/// One row of the codec-keyed policy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecPolicy {
    /// Codec names (lowercase, as reported by ffprobe) this row applies to
    pub codecs: Vec<String>,
    pub feasible: bool,
    /// Estimated processing minutes per hour of content
    pub minutes_per_hour: f64,
    pub reason: String,
    pub class: PolicyClass,
}

impl CodecPolicy {
    fn row(codecs: &[&str], feasible: bool, minutes_per_hour: f64, reason: &str, class: PolicyClass) -> Self {
        Self {
            codecs: codecs.iter().map(|c| c.to_string()).collect(),
            feasible,
            minutes_per_hour,
            reason: reason.to_string(),
            class,
        }
    }

    /// Built-in policy table, overridable through `codec_policies` in the config
    pub fn default_table() -> Vec<CodecPolicy> {
        vec![
            Self::row(&["hevc", "h265", "h264"], true, 3.0, "Fast remux (no re-encoding)", PolicyClass::FastRemux),
            Self::row(&["mpeg4"], true, 120.0, "MPEG-4 re-encoding acceptable", PolicyClass::ModerateReencode),
            Self::row(&["mpeg2video"], true, 90.0, "MPEG-2 re-encoding acceptable", PolicyClass::ModerateReencode),
            Self::row(&["av1"], false, 1800.0, "AV1 re-encoding too slow (48+ hours)", PolicyClass::Refuse),
        ]
    }

    pub fn matches(&self, codec: &str) -> bool {
        self.codecs.iter().any(|c| c.eq_ignore_ascii_case(codec))
    }
}

/// Planner verdict for one probed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionDecision {
    pub feasible: bool,
    pub estimated_minutes: f64,
    pub reason: String,
    pub class: PolicyClass,
}

impl ConversionDecision {
    pub fn estimated_hours(&self) -> f64 {
        self.estimated_minutes / 60.0
    }
}

/// Codec-keyed lookup over a policy table. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct ConversionPlanner {
    policies: Vec<CodecPolicy>,
}

impl Default for ConversionPlanner {
    fn default() -> Self {
        Self::new(CodecPolicy::default_table())
    }
}

impl ConversionPlanner {
    pub fn new(policies: Vec<CodecPolicy>) -> Self {
        Self { policies }
    }

    pub fn decide(&self, codec: &str, duration_hours: f64) -> ConversionDecision {
        match self.policies.iter().find(|p| p.matches(codec)) {
            Some(policy) => ConversionDecision {
                feasible: policy.feasible,
                estimated_minutes: policy.minutes_per_hour * duration_hours.max(0.0),
                reason: policy.reason.clone(),
                class: policy.class,
            },
            None => ConversionDecision {
                feasible: false,
                estimated_minutes: 0.0,
                reason: format!("Unknown codec: {} (manual review recommended)", codec),
                class: PolicyClass::Refuse,
            },
        }
    }

    pub fn plan(&self, media: &MediaFile) -> ConversionDecision {
        self.decide(&media.video_codec, media.duration_hours())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stream_copy_codecs_are_fast() {
        let planner = ConversionPlanner::default();
        for codec in ["hevc", "h265", "h264", "HEVC"] {
            let d = planner.decide(codec, 2.0);
            assert!(d.feasible, "{} should be feasible", codec);
            assert_eq!(d.class, PolicyClass::FastRemux);
            assert_eq!(d.estimated_minutes, 6.0);
        }
    }

    #[test]
    fn legacy_codecs_need_reencode() {
        let planner = ConversionPlanner::default();
        assert_eq!(planner.decide("mpeg4", 1.0).estimated_minutes, 120.0);
        assert_eq!(planner.decide("mpeg2video", 1.0).estimated_minutes, 90.0);
        assert_eq!(planner.decide("mpeg2video", 1.0).class, PolicyClass::ModerateReencode);
    }

    #[test]
    fn av1_is_refused() {
        let d = ConversionPlanner::default().decide("av1", 2.0);
        assert!(!d.feasible);
        assert_eq!(d.estimated_minutes, 3600.0);
        assert!(d.reason.contains("AV1"));
    }

    #[test]
    fn unknown_codec_needs_manual_review() {
        let d = ConversionPlanner::default().decide("vc1", 2.0);
        assert!(!d.feasible);
        assert_eq!(d.estimated_minutes, 0.0);
        assert_eq!(d.reason, "Unknown codec: vc1 (manual review recommended)");
    }

    #[test]
    fn table_can_be_overridden() {
        let mut table = CodecPolicy::default_table();
        table.insert(
            0,
            CodecPolicy::row(&["av1"], true, 3.0, "AV1 stream copy", PolicyClass::FastRemux),
        );
        let d = ConversionPlanner::new(table).decide("av1", 1.0);
        assert!(d.feasible);
        assert_eq!(d.reason, "AV1 stream copy");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn planning_is_deterministic_and_linear(
            codec in prop_oneof![Just("hevc"), Just("h264"), Just("mpeg4"), Just("av1"), Just("xyz")],
            hours in 0.0f64..10.0,
        ) {
            let planner = ConversionPlanner::default();
            let a = planner.decide(codec, hours);
            let b = planner.decide(codec, hours);
            prop_assert_eq!(&a, &b);
            let unit = planner.decide(codec, 1.0);
            prop_assert!((a.estimated_minutes - unit.estimated_minutes * hours).abs() < 1e-6);
        }
    }
}
