//! Subscription state machine
//!
//! [`apply`] is a pure function from the current subscription and a
//! canonical [`Transition`] to either a new subscription value or "no change".
//! It never performs I/O; the ledger persists the result with a
//! compare-and-swap, so a transition either fully applies or leaves the
//! stored row untouched.
//!
//! Out-of-order delivery is handled here: an event describing an earlier
//! billing period than the one stored never regresses the subscription, a
//! payment failure observed before the last successful payment is ignored, and
//! a status snapshot taken before the newest event already applied (or before
//! a local cancellation) is dropped.

use chrono::{DateTime, Utc};

use cadence_types::{Subscription, SubscriptionStatus};
use SubscriptionStatus::*;

use crate::error::BillingError;

/// A billing period reported by a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// Build a period, rejecting empty or inverted ranges
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BillingError> {
        if end <= start {
            return Err(BillingError::Validation(
                "billing period end must be after its start".to_string(),
            ));
        }
        Ok(Self { start, end })
    }
}

/// How a successful payment moves the billing period
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodUpdate {
    /// Leave the stored period as it is
    Keep,
    /// The platform reported the new period
    Exact(BillingPeriod),
    /// Roll forward by one nominal cycle from the stored period end
    Advance,
}

/// Full status snapshot reported by a platform
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: SubscriptionStatus,
    pub period: Option<BillingPeriod>,
    pub trial: Option<BillingPeriod>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// When the platform produced the snapshot
    pub observed_at: DateTime<Utc>,
}

/// Canonical transition request
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Platform confirmed the subscription
    Activate {
        period: Option<BillingPeriod>,
        trial: Option<BillingPeriod>,
    },
    /// Platform reported the first payment never succeeded
    ActivationFailed,
    /// A payment succeeded (first payment, renewal or recovery)
    PaymentSucceeded {
        period: PeriodUpdate,
        paid_at: DateTime<Utc>,
    },
    /// A renewal payment failed
    PaymentFailed {
        period_end: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
    },
    /// Mirror the platform's own view of the subscription
    Sync(StatusSnapshot),
    Pause,
    /// Undo a scheduled cancellation or a pause
    Resume,
    /// Platform deleted or revoked the subscription
    Delete { at: DateTime<Utc> },
    /// Platform reported the subscription lapsed
    Expire,
    /// User- or platform-requested cancellation
    Cancel {
        immediately: bool,
        reason: Option<String>,
    },
    /// A deferred cancellation came due
    FinalizeCancellation,
}

impl Transition {
    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate { .. } => "activate",
            Self::ActivationFailed => "activation_failed",
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::Sync(_) => "sync",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Delete { .. } => "delete",
            Self::Expire => "expire",
            Self::Cancel { .. } => "cancel",
            Self::FinalizeCancellation => "finalize_cancellation",
        }
    }
}

/// Result of applying a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The subscription changed to this value
    Changed(Subscription),
    /// Nothing to do: duplicate, stale or already in the requested state
    Unchanged,
}

/// Apply `transition` to `current` at time `now`.
///
/// Fails with [`BillingError::StateConflict`] when the transition is not
/// accepted from the current status. Terminal subscriptions reject every
/// transition except cancellation, which is idempotent.
pub fn apply(
    current: &Subscription,
    transition: &Transition,
    now: DateTime<Utc>,
) -> Result<Applied, BillingError> {
    if current.status.is_terminal() {
        return match transition {
            Transition::Cancel { .. } | Transition::FinalizeCancellation => Ok(Applied::Unchanged),
            other => Err(conflict(current, other)),
        };
    }

    let mut next = current.clone();

    match transition {
        Transition::Activate { period, trial } => {
            if let Some(period) = period {
                if is_stale(current, period.end) {
                    return Ok(Applied::Unchanged);
                }
                set_period(&mut next, *period);
            }
            if let Some(trial) = trial {
                next.trial_start = Some(trial.start);
                next.trial_end = Some(trial.end);
            }
            next.status = match current.status {
                Pending if in_trial(&next, now) => Trialing,
                Pending | PastDue | Paused => Active,
                status => status,
            };
        }

        Transition::ActivationFailed => {
            if current.status != Pending {
                return Err(conflict(current, transition));
            }
            next.status = Expired;
        }

        Transition::PaymentSucceeded { period, paid_at } => {
            match period {
                PeriodUpdate::Exact(period) if is_stale(current, period.end) => {
                    return Ok(Applied::Unchanged);
                }
                PeriodUpdate::Exact(period) => set_period(&mut next, *period),
                PeriodUpdate::Advance => {
                    let start = current.current_period_end;
                    set_period(
                        &mut next,
                        BillingPeriod {
                            start,
                            end: start + current.billing_cycle.nominal_period(),
                        },
                    );
                }
                PeriodUpdate::Keep => {}
            }

            let renewed = next.current_period_end > current.current_period_end;
            if renewed {
                // A renewal outranks a cancellation scheduled for the old period end.
                next.cancel_at = None;
                next.cancel_reason = None;
            }

            next.status = match current.status {
                Pending | Trialing if in_trial(&next, now) && !renewed => Trialing,
                _ => Active,
            };
            if current.last_payment_at.map_or(true, |last| *paid_at > last) {
                next.last_payment_at = Some(*paid_at);
            }
            next.next_payment_at = Some(next.current_period_end);
            observe(&mut next, *paid_at);
        }

        Transition::PaymentFailed {
            period_end,
            failed_at,
        } => {
            let stale_period = period_end.is_some_and(|end| is_stale(current, end));
            let already_recovered = current.last_payment_at.is_some_and(|paid| paid >= *failed_at);
            if stale_period || already_recovered {
                return Ok(Applied::Unchanged);
            }
            match current.status {
                Active | Trialing => {
                    next.status = PastDue;
                    observe(&mut next, *failed_at);
                }
                // First payment retries and repeated failures leave the status alone
                Pending | PastDue | Paused => return Ok(Applied::Unchanged),
                Canceled | Expired => return Err(conflict(current, transition)),
            }
        }

        Transition::Sync(snapshot) => {
            if predates_last_event(current, snapshot.observed_at) {
                return Ok(Applied::Unchanged);
            }
            if let Some(period) = snapshot.period {
                if is_stale(current, period.end) {
                    return Ok(Applied::Unchanged);
                }
            }
            if snapshot.status == Pending && current.status != Pending {
                return Ok(Applied::Unchanged);
            }
            if snapshot.status == PastDue
                && current
                    .last_payment_at
                    .is_some_and(|paid| paid >= snapshot.observed_at)
            {
                return Ok(Applied::Unchanged);
            }

            if let Some(period) = snapshot.period {
                set_period(&mut next, period);
            }
            if let Some(trial) = snapshot.trial {
                next.trial_start = Some(trial.start);
                next.trial_end = Some(trial.end);
            }
            next.status = snapshot.status;
            next.cancel_at = snapshot.cancel_at;
            if snapshot.status.is_terminal() {
                let at = snapshot.canceled_at.unwrap_or(now);
                next.canceled_at = Some(at);
                next.cancel_at = Some(snapshot.cancel_at.unwrap_or(at));
            }
            observe(&mut next, snapshot.observed_at);
        }

        Transition::Pause => match current.status {
            Active | Trialing | PastDue => next.status = Paused,
            Paused => return Ok(Applied::Unchanged),
            _ => return Err(conflict(current, transition)),
        },

        Transition::Resume => {
            if current.cancel_at.is_none() && current.status != Paused {
                return Ok(Applied::Unchanged);
            }
            if current.status == Pending {
                return Err(conflict(current, transition));
            }
            next.cancel_at = None;
            next.cancel_reason = None;
            if current.status == Paused {
                next.status = Active;
            }
        }

        Transition::Delete { at } => {
            next.status = Canceled;
            next.canceled_at = Some(*at);
            next.cancel_at = Some(current.cancel_at.map_or(*at, |scheduled| scheduled.min(*at)));
        }

        Transition::Expire => {
            next.status = Expired;
        }

        Transition::Cancel {
            immediately: true,
            reason,
        } => {
            next.status = Canceled;
            next.cancel_at = Some(now);
            next.canceled_at = Some(now);
            next.cancel_reason = reason.clone().or_else(|| current.cancel_reason.clone());
            observe(&mut next, now);
        }

        Transition::Cancel {
            immediately: false,
            reason,
        } => match current.status {
            Active | Trialing | PastDue => {
                if current.cancel_at == Some(current.current_period_end) {
                    return Ok(Applied::Unchanged);
                }
                next.cancel_at = Some(current.current_period_end);
                next.cancel_reason = reason.clone().or_else(|| current.cancel_reason.clone());
                observe(&mut next, now);
            }
            _ => return Err(conflict(current, transition)),
        },

        Transition::FinalizeCancellation => {
            if !current.cancellation_due(now) {
                return Ok(Applied::Unchanged);
            }
            next.status = Canceled;
            next.canceled_at = current.cancel_at;
        }
    }

    if next == *current {
        return Ok(Applied::Unchanged);
    }
    next.updated_at = now;
    Ok(Applied::Changed(next))
}

fn set_period(sub: &mut Subscription, period: BillingPeriod) {
    sub.current_period_start = period.start;
    sub.current_period_end = period.end;
}

/// An event for a period ending before the stored one is out of date.
/// A PENDING subscription only holds a placeholder period.
fn is_stale(current: &Subscription, period_end: DateTime<Utc>) -> bool {
    current.status != Pending && period_end < current.current_period_end
}

/// A snapshot taken before the newest event already reflected in the row
fn predates_last_event(current: &Subscription, observed_at: DateTime<Utc>) -> bool {
    current.last_event_at.is_some_and(|seen| observed_at < seen)
}

fn observe(sub: &mut Subscription, at: DateTime<Utc>) {
    sub.last_event_at = Some(sub.last_event_at.map_or(at, |seen| seen.max(at)));
}

fn in_trial(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.trial_end.is_some_and(|end| end > now)
}

fn conflict(current: &Subscription, transition: &Transition) -> BillingError {
    BillingError::StateConflict(format!(
        "cannot apply {} to a {} subscription",
        transition.name(),
        current.status
    ))
}
