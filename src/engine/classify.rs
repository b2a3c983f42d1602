use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::MetricKind;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Normal,
    NeedsImprovement,
    InsufficientData,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Normal => "normal",
            Self::NeedsImprovement => "needs improvement",
            Self::InsufficientData => "insufficient data",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Bands {
    excellent: f64,
    good: f64,
    normal: f64,
}

const ADDITIVE_BANDS: Bands = Bands {
    excellent: 1.5,
    good: 1.2,
    normal: 0.8,
};

// Rates move less than raw counts, hence the narrower bands.
const RATIO_BANDS: Bands = Bands {
    excellent: 1.2,
    good: 1.1,
    normal: 0.9,
};

pub fn grade(kind: MetricKind, coefficient: f64) -> Grade {
    let bands = match kind {
        MetricKind::Additive => &ADDITIVE_BANDS,
        MetricKind::Ratio => &RATIO_BANDS,
    };

    if coefficient >= bands.excellent {
        Grade::Excellent
    } else if coefficient >= bands.good {
        Grade::Good
    } else if coefficient >= bands.normal {
        Grade::Normal
    } else {
        Grade::NeedsImprovement
    }
}
