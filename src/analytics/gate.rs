use std::fmt;

use crate::analytics::consent::ConsentStatus;

/// A precondition that keeps the primary channel closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Blocker {
    Disabled,
    MissingMeasurementId,
    DoNotTrack,
    NoConsent,
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Blocker::Disabled => "analytics disabled via flag",
            Blocker::MissingMeasurementId => "missing GA4 measurement id",
            Blocker::DoNotTrack => "Do-Not-Track enabled; analytics suppressed",
            Blocker::NoConsent => "consent not granted; gating analytics",
        };
        f.write_str(text)
    }
}

/// Inputs of the allowance decision, sampled fresh for every tracking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateInputs {
    pub enabled: bool,
    pub has_measurement_id: bool,
    pub do_not_track: bool,
    pub consent: ConsentStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allowance {
    blockers: Vec<Blocker>,
}

impl Allowance {
    pub fn is_allowed(&self) -> bool {
        self.blockers.is_empty()
    }

    pub fn blockers(&self) -> &[Blocker] {
        &self.blockers
    }
}

/// `enabled && id present && !dnt && consent == granted`.
pub fn is_allowed(inputs: GateInputs) -> bool {
    evaluate(inputs).is_allowed()
}

pub fn evaluate(inputs: GateInputs) -> Allowance {
    let mut blockers = Vec::new();
    if !inputs.enabled {
        blockers.push(Blocker::Disabled);
    }
    if !inputs.has_measurement_id {
        blockers.push(Blocker::MissingMeasurementId);
    }
    if inputs.do_not_track {
        blockers.push(Blocker::DoNotTrack);
    }
    if inputs.consent != ConsentStatus::Granted {
        blockers.push(Blocker::NoConsent);
    }
    Allowance { blockers }
}
