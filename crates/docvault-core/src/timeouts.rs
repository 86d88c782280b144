//! Adaptive per-step time budgets.
//!
//! Each pipeline step gets a soft and a hard budget computed from the file
//! size and mime class:
//!
//! ```text
//! soft = base + k × size_mb          (k × 1.5 for PDF/Office extraction)
//! hard = soft × 1.5                  (plain-text classes)
//! hard = soft × 2.0                  (everything else)
//! ```
//!
//! Both are clamped to fixed ceilings. Crossing `soft` is only worth a
//! warning; crossing `hard` aborts the run.

use serde::Deserialize;
use std::time::Duration;

use crate::models::{MimeClass, StepName};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// `soft = base_secs + per_mb_secs × size_mb` for one step.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct StepBudget {
    pub base_secs: f64,
    pub per_mb_secs: f64,
}

impl StepBudget {
    pub const fn new(base_secs: f64, per_mb_secs: f64) -> Self {
        Self {
            base_secs,
            per_mb_secs,
        }
    }
}

/// Budget constants, configurable under `[ingest.timeouts]`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_scan")]
    pub scan: StepBudget,
    #[serde(default = "default_extract")]
    pub extract: StepBudget,
    #[serde(default = "default_keyword_index")]
    pub keyword_index: StepBudget,
    #[serde(default = "default_vector_index")]
    pub vector_index: StepBudget,
    #[serde(default = "default_finalize")]
    pub finalize: StepBudget,
    /// Multiplier on `per_mb_secs` when extracting PDF and Office files.
    #[serde(default = "default_office_extract_weight")]
    pub office_extract_weight: f64,
    #[serde(default = "default_plain_hard_factor")]
    pub plain_hard_factor: f64,
    #[serde(default = "default_rich_hard_factor")]
    pub rich_hard_factor: f64,
    #[serde(default = "default_soft_ceiling_secs")]
    pub soft_ceiling_secs: f64,
    #[serde(default = "default_hard_ceiling_secs")]
    pub hard_ceiling_secs: f64,
}

fn default_scan() -> StepBudget {
    StepBudget::new(10.0, 2.0)
}

fn default_extract() -> StepBudget {
    StepBudget::new(15.0, 4.0)
}

fn default_keyword_index() -> StepBudget {
    StepBudget::new(10.0, 1.0)
}

fn default_vector_index() -> StepBudget {
    StepBudget::new(20.0, 6.0)
}

fn default_finalize() -> StepBudget {
    StepBudget::new(5.0, 0.0)
}

fn default_office_extract_weight() -> f64 {
    1.5
}

fn default_plain_hard_factor() -> f64 {
    1.5
}

fn default_rich_hard_factor() -> f64 {
    2.0
}

fn default_soft_ceiling_secs() -> f64 {
    240.0
}

fn default_hard_ceiling_secs() -> f64 {
    360.0
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scan: default_scan(),
            extract: default_extract(),
            keyword_index: default_keyword_index(),
            vector_index: default_vector_index(),
            finalize: default_finalize(),
            office_extract_weight: default_office_extract_weight(),
            plain_hard_factor: default_plain_hard_factor(),
            rich_hard_factor: default_rich_hard_factor(),
            soft_ceiling_secs: default_soft_ceiling_secs(),
            hard_ceiling_secs: default_hard_ceiling_secs(),
        }
    }
}

/// Soft and hard deadlines for one step of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBudget {
    pub soft: Duration,
    pub hard: Duration,
}

impl TimeoutConfig {
    fn step(&self, step: StepName) -> StepBudget {
        match step {
            StepName::Scan => self.scan,
            StepName::Extract => self.extract,
            StepName::KeywordIndex => self.keyword_index,
            StepName::VectorIndex => self.vector_index,
            StepName::Finalize => self.finalize,
        }
    }

    /// Compute the budget for `step` on a file of `size_bytes` and `mime`.
    pub fn budget(&self, step: StepName, size_bytes: u64, mime: MimeClass) -> TimeBudget {
        let size_mb = size_bytes as f64 / BYTES_PER_MB;
        let StepBudget {
            base_secs,
            mut per_mb_secs,
        } = self.step(step);

        if step == StepName::Extract && is_office_or_pdf(mime) {
            per_mb_secs *= self.office_extract_weight;
        }

        let raw_soft = base_secs + per_mb_secs * size_mb;
        let factor = if mime.is_plain_text() {
            self.plain_hard_factor
        } else {
            self.rich_hard_factor
        };

        let soft = raw_soft.min(self.soft_ceiling_secs);
        let hard = (raw_soft * factor).min(self.hard_ceiling_secs).max(soft);

        TimeBudget {
            soft: Duration::from_secs_f64(soft.max(0.0)),
            hard: Duration::from_secs_f64(hard.max(0.0)),
        }
    }
}

fn is_office_or_pdf(mime: MimeClass) -> bool {
    matches!(
        mime,
        MimeClass::Pdf | MimeClass::Docx | MimeClass::Pptx | MimeClass::Xlsx
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn small_text_file_gets_base_budget() {
        let cfg = TimeoutConfig::default();
        let b = cfg.budget(StepName::Scan, 0, MimeClass::Text);
        assert_eq!(b.soft, Duration::from_secs(10));
        assert_eq!(b.hard, Duration::from_secs(15));
    }

    #[test]
    fn pdf_extract_is_weighted() {
        let cfg = TimeoutConfig::default();
        let b = cfg.budget(StepName::Extract, 2 * MB, MimeClass::Pdf);
        // 15 + 4 × 1.5 × 2 = 27, hard factor 2.0
        assert_eq!(b.soft, Duration::from_secs(27));
        assert_eq!(b.hard, Duration::from_secs(54));
    }

    #[test]
    fn office_weight_applies_only_to_extract() {
        let cfg = TimeoutConfig::default();
        let b = cfg.budget(StepName::KeywordIndex, 2 * MB, MimeClass::Docx);
        assert_eq!(b.soft, Duration::from_secs(12));
        assert_eq!(b.hard, Duration::from_secs(24));
    }

    #[test]
    fn huge_files_hit_ceilings() {
        let cfg = TimeoutConfig::default();
        let b = cfg.budget(StepName::VectorIndex, 500 * MB, MimeClass::Pdf);
        assert_eq!(b.soft, Duration::from_secs(240));
        assert_eq!(b.hard, Duration::from_secs(360));
    }

    #[test]
    fn hard_never_below_soft() {
        let cfg = TimeoutConfig::default();
        for step in [
            StepName::Scan,
            StepName::Extract,
            StepName::KeywordIndex,
            StepName::VectorIndex,
            StepName::Finalize,
        ] {
            for size in [0, MB, 10 * MB, 100 * MB, 1000 * MB] {
                for mime in MimeClass::ALL {
                    let b = cfg.budget(step, size, mime);
                    assert!(b.hard >= b.soft, "{step} {size} {mime}");
                    assert!(b.hard <= Duration::from_secs(360));
                }
            }
        }
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: TimeoutConfig =
            toml::from_str("[scan]\nbase_secs = 1.0\nper_mb_secs = 0.5\n").unwrap();
        assert_eq!(cfg.scan, StepBudget::new(1.0, 0.5));
        assert_eq!(cfg.extract, StepBudget::new(15.0, 4.0));
        assert_eq!(cfg.hard_ceiling_secs, 360.0);
    }
}
