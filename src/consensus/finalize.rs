//! Finalization: moving a pack to permanent storage and applying its body.

use num_bigint::BigUint;
use num_traits::Zero;

use super::sequence::Sequencer;
use crate::config::VmConfig;
use crate::constants::{BASE_TOKEN, COMMUNITY_ADDRESS};
use crate::pack::Pack;
use crate::state::{Ledger, StateError};
use crate::transition::{Body, Kind, Origin};
use crate::short;

/// What finalization did with a pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Transitions applied.
    Applied,
    /// Stale milestone or broken sequence: the author's base balance went to the community.
    Forfeited,
    /// Fees exceeded the author's balance; nothing applied.
    Unfunded,
}

/// Finalize `pack`. Commissions are added to its payment, then the body is
/// applied in [`Kind::APPLY_ORDER`] followed by every contract output.
pub fn make_stable(
    ledger: &mut Ledger,
    sequencer: &mut Sequencer,
    config: &VmConfig,
    pack: &Pack,
) -> Result<Outcome, StateError> {
    let hash = pack.hash();
    ledger.make_permanent(&hash)?;

    let current = ledger.milestone()?;
    // A forfeited pack is stable but never becomes `last_stable`.
    if pack.milestone != current || !sequencer.is_sequential(ledger, pack)? {
        forfeit(ledger, pack)?;
        return Ok(Outcome::Forfeited);
    }

    let stabilizers = ledger.stabilizers()?;
    let fees = pack.commissions(&stabilizers);
    if fees > ledger.balance(&pack.author, &BASE_TOKEN)? {
        tracing::debug!(pack = %short(&hash), fees = %fees, "Fees not covered, body skipped");
        ledger.set_last_stable(&hash)?;
        return Ok(Outcome::Unfunded);
    }

    let mut body = pack.body.clone();
    let share = BigUint::from(pack.len());
    let payment = body.payment.get_or_insert_with(Default::default);
    for stabilizer in stabilizers.iter().filter(|s| s.address != pack.author) {
        payment.add(BASE_TOKEN, stabilizer.address, &share);
    }
    payment.add(BASE_TOKEN, COMMUNITY_ADDRESS, &share);

    let outputs = apply_body(ledger, config, &body, &pack.origin())?;
    for output in &outputs {
        apply_body(ledger, config, &output.body, &output.origin())?;
        tracing::debug!(pack = %short(&hash), output = %short(&output.hash()), "Applied contract output");
    }

    ledger.set_last_stable(&hash)?;
    tracing::info!(pack = %short(&hash), outputs = outputs.len(), "Pack stabilized");
    Ok(Outcome::Applied)
}

fn forfeit(ledger: &mut Ledger, pack: &Pack) -> Result<(), StateError> {
    let balance = ledger.balance(&pack.author, &BASE_TOKEN)?;
    if !balance.is_zero() {
        ledger.credit(&COMMUNITY_ADDRESS, &BASE_TOKEN, &balance)?;
        ledger.set_balance(&pack.author, &BASE_TOKEN, &BigUint::zero())?;
    }
    tracing::warn!(
        pack = %short(&pack.hash()),
        author = %hex::encode(pack.author),
        forfeited = %balance,
        "Pack forfeited on stabilization"
    );
    Ok(())
}

/// Apply every transition of `body`. Returns the output packs of its Execute.
fn apply_body(
    ledger: &mut Ledger,
    config: &VmConfig,
    body: &Body,
    origin: &Origin,
) -> Result<Vec<Pack>, StateError> {
    let mut payment = body.payment.clone().unwrap_or_default();
    let mut outputs = Vec::new();
    for kind in Kind::APPLY_ORDER {
        match kind {
            Kind::Milestone => {
                if let Some(t) = &body.milestone {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Execute => {
                if let Some(t) = &body.execute {
                    outputs = t.apply(ledger, origin, &mut payment, config)?;
                }
            }
            Kind::Account => {
                if let Some(t) = &body.account {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Token => {
                if let Some(t) = &body.token {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Dapp => {
                if let Some(t) = &body.dapp {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Issue => {
                if let Some(t) = &body.issue {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Burn => {
                if let Some(t) = &body.burn {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Support => {
                if let Some(t) = &body.support {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Channel => {
                if let Some(t) = &body.channel {
                    t.apply(ledger, origin)?;
                }
            }
            Kind::Payment => payment.apply(ledger, origin)?,
        }
    }
    Ok(outputs)
}
