//! Transitions: the operations a pack carries.
//!
//! A pack holds at most one transition of each [`Kind`]. On the wire each
//! transition is a one-byte tag followed by its payload; the [`Body`] encodes
//! them in a fixed order and rejects a kind that appears twice.
//!
//! Applying a transition never fails for semantic reasons: a transition whose
//! preconditions do not hold (missing balance, unknown token, ...) is skipped
//! and logged at debug level. Only storage errors propagate.

pub mod account;
pub mod burn;
pub mod channel;
pub mod dapp;
pub mod execute;
pub mod issue;
pub mod milestone;
pub mod payment;
pub mod support;
pub mod token;

use num_bigint::BigUint;
use serde_json::{Map, Value};

use crate::codec::{CodecError, Fault, Reader, Writer};
use crate::{Address, Hash};

pub use account::Account;
pub use burn::Burn;
pub use channel::Channel;
pub use dapp::Dapp;
pub use execute::Execute;
pub use issue::Issue;
pub use milestone::Milestone;
pub use payment::Payment;
pub use support::Support;
pub use token::{TokenDefine, TokenSpec};

/// Transition type and its wire tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Kind {
    Payment = 0,
    Issue = 1,
    Burn = 2,
    Support = 3,
    Token = 4,
    Channel = 5,
    Account = 6,
    Dapp = 7,
    Execute = 8,
    Milestone = 9,
}

impl Kind {
    /// Order in which a body writes its transitions.
    pub const ENCODE_ORDER: [Kind; 10] = [
        Kind::Milestone,
        Kind::Account,
        Kind::Token,
        Kind::Dapp,
        Kind::Issue,
        Kind::Burn,
        Kind::Support,
        Kind::Channel,
        Kind::Payment,
        Kind::Execute,
    ];

    /// Order in which finalization applies them.
    pub const APPLY_ORDER: [Kind; 10] = [
        Kind::Milestone,
        Kind::Execute,
        Kind::Account,
        Kind::Token,
        Kind::Dapp,
        Kind::Issue,
        Kind::Burn,
        Kind::Support,
        Kind::Channel,
        Kind::Payment,
    ];

    pub fn from_tag(tag: u8) -> Option<Kind> {
        Some(match tag {
            0 => Kind::Payment,
            1 => Kind::Issue,
            2 => Kind::Burn,
            3 => Kind::Support,
            4 => Kind::Token,
            5 => Kind::Channel,
            6 => Kind::Account,
            7 => Kind::Dapp,
            8 => Kind::Execute,
            9 => Kind::Milestone,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Payment => "payment",
            Kind::Issue => "issue",
            Kind::Burn => "burn",
            Kind::Support => "support",
            Kind::Token => "token",
            Kind::Channel => "channel",
            Kind::Account => "account",
            Kind::Dapp => "dapp",
            Kind::Execute => "execute",
            Kind::Milestone => "milestone",
        }
    }
}

/// Who applies a transition: the pack it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Origin {
    pub hash: Hash,
    pub author: Address,
    pub milestone: Hash,
}

/// One decoded transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Payment(Payment),
    Issue(Issue),
    Burn(Burn),
    Support(Support),
    Token(TokenDefine),
    Channel(Channel),
    Account(Account),
    Dapp(Dapp),
    Execute(Execute),
    Milestone(Milestone),
}

impl Transition {
    pub fn kind(&self) -> Kind {
        match self {
            Transition::Payment(_) => Kind::Payment,
            Transition::Issue(_) => Kind::Issue,
            Transition::Burn(_) => Kind::Burn,
            Transition::Support(_) => Kind::Support,
            Transition::Token(_) => Kind::Token,
            Transition::Channel(_) => Kind::Channel,
            Transition::Account(_) => Kind::Account,
            Transition::Dapp(_) => Kind::Dapp,
            Transition::Execute(_) => Kind::Execute,
            Transition::Milestone(_) => Kind::Milestone,
        }
    }

    /// Read a tag and the payload it announces.
    pub fn decode(r: &mut Reader<'_>) -> Result<Transition, CodecError> {
        let tag = r.u8()?;
        let kind = Kind::from_tag(tag).ok_or(Fault::UnknownTag(tag))?;
        Ok(match kind {
            Kind::Payment => Transition::Payment(Payment::decode(r)?),
            Kind::Issue => Transition::Issue(Issue::decode(r)?),
            Kind::Burn => Transition::Burn(Burn::decode(r)?),
            Kind::Support => Transition::Support(Support::decode(r)?),
            Kind::Token => Transition::Token(TokenDefine::decode(r)?),
            Kind::Channel => Transition::Channel(Channel::decode(r)?),
            Kind::Account => Transition::Account(Account::decode(r)?),
            Kind::Dapp => Transition::Dapp(Dapp::decode(r)?),
            Kind::Execute => Transition::Execute(Execute::decode(r)?),
            Kind::Milestone => Transition::Milestone(Milestone::decode(r)?),
        })
    }
}

/// The transitions of one pack, at most one per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Body {
    pub payment: Option<Payment>,
    pub issue: Option<Issue>,
    pub burn: Option<Burn>,
    pub support: Option<Support>,
    pub token: Option<TokenDefine>,
    pub channel: Option<Channel>,
    pub account: Option<Account>,
    pub dapp: Option<Dapp>,
    pub execute: Option<Execute>,
    pub milestone: Option<Milestone>,
}

impl Body {
    /// Place a decoded transition, failing if its kind is already present.
    pub fn insert(&mut self, transition: Transition) -> Result<(), CodecError> {
        fn place<T>(slot: &mut Option<T>, value: T) -> Result<(), CodecError> {
            if slot.is_some() {
                return Err(Fault::DuplicateTransition.into());
            }
            *slot = Some(value);
            Ok(())
        }
        match transition {
            Transition::Payment(t) => place(&mut self.payment, t),
            Transition::Issue(t) => place(&mut self.issue, t),
            Transition::Burn(t) => place(&mut self.burn, t),
            Transition::Support(t) => place(&mut self.support, t),
            Transition::Token(t) => place(&mut self.token, t),
            Transition::Channel(t) => place(&mut self.channel, t),
            Transition::Account(t) => place(&mut self.account, t),
            Transition::Dapp(t) => place(&mut self.dapp, t),
            Transition::Execute(t) => place(&mut self.execute, t),
            Transition::Milestone(t) => place(&mut self.milestone, t),
        }
    }

    /// Whether the kind is present with at least one entry.
    pub fn has(&self, kind: Kind) -> bool {
        match kind {
            Kind::Payment => self.payment.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Issue => self.issue.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Burn => self.burn.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Support => self.support.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Token => self.token.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Channel => self.channel.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Account => self.account.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Dapp => self.dapp.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Execute => self.execute.as_ref().is_some_and(|t| !t.is_empty()),
            Kind::Milestone => self.milestone.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !Kind::ENCODE_ORDER.iter().any(|kind| self.has(*kind))
    }

    /// Write every non-empty transition in [`Kind::ENCODE_ORDER`].
    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        for kind in Kind::ENCODE_ORDER {
            if !self.has(kind) {
                continue;
            }
            w.u8(kind.tag());
            match kind {
                Kind::Payment => self.payment.as_ref().map(|t| t.encode(w)),
                Kind::Issue => self.issue.as_ref().map(|t| t.encode(w)),
                Kind::Burn => self.burn.as_ref().map(|t| t.encode(w)),
                Kind::Support => self.support.as_ref().map(|t| t.encode(w)),
                Kind::Token => self.token.as_ref().map(|t| t.encode(w)),
                Kind::Channel => self.channel.as_ref().map(|t| t.encode(w)),
                Kind::Account => self.account.as_ref().map(|t| t.encode(w)),
                Kind::Dapp => self.dapp.as_ref().map(|t| t.encode(w)),
                Kind::Execute => self.execute.as_ref().map(|t| t.encode(w)),
                Kind::Milestone => self.milestone.as_ref().map(|t| t.encode(w)),
            }
            .transpose()?;
        }
        Ok(())
    }

    /// Read transitions until the input is exhausted. At least one is required.
    pub fn decode(r: &mut Reader<'_>) -> Result<Body, CodecError> {
        if r.is_empty() {
            return Err(Fault::NoTransitions.into());
        }
        let mut body = Body::default();
        while !r.is_empty() {
            body.insert(Transition::decode(r)?)?;
        }
        Ok(body)
    }

    pub fn display(&self) -> Value {
        let mut out = Map::new();
        for kind in Kind::ENCODE_ORDER {
            if !self.has(kind) {
                continue;
            }
            let value = match kind {
                Kind::Payment => self.payment.as_ref().map(Payment::display),
                Kind::Issue => self.issue.as_ref().map(Issue::display),
                Kind::Burn => self.burn.as_ref().map(Burn::display),
                Kind::Support => self.support.as_ref().map(Support::display),
                Kind::Token => self.token.as_ref().map(TokenDefine::display),
                Kind::Channel => self.channel.as_ref().map(Channel::display),
                Kind::Account => self.account.as_ref().map(Account::display),
                Kind::Dapp => self.dapp.as_ref().map(Dapp::display),
                Kind::Execute => self.execute.as_ref().map(Execute::display),
                Kind::Milestone => self.milestone.as_ref().map(Milestone::display),
            };
            if let Some(value) = value {
                out.insert(kind.name().to_string(), value);
            }
        }
        Value::Object(out)
    }
}

/// Display form of a big integer: decimal digits with a trailing `n`.
pub fn amount_json(amount: &BigUint) -> Value {
    Value::String(format!("{}n", amount))
}
