//! Compatibility check between a stored chain configuration and a new one.
//!
//! Changing a fork activation that the local chain has already passed would
//! rewrite finalized history. The check reports the first such conflict
//! together with the height the chain must be rewound to.

use crate::chain_config::{ChainRules, Fork};
use crate::error::ConfigMismatch;
use tracing::debug;

/// Check whether `new` can replace `stored` for a chain whose head is at `head`.
///
/// Conflicts are searched repeatedly with the head lowered to the previous
/// rewind point, so the returned mismatch is the lowest one.
pub fn is_compatible(
    stored: &dyn ChainRules,
    new: &dyn ChainRules,
    head: u64,
) -> Result<(), ConfigMismatch> {
    let mut head = head;
    let mut last: Option<ConfigMismatch> = None;
    loop {
        match check_at(stored, new, head) {
            None => break,
            Some(err) => {
                if last.as_ref().is_some_and(|l| l.rewind_to == err.rewind_to) {
                    break;
                }
                debug!(head, rewind_to = err.rewind_to, what = %err.what, "Config conflict");
                head = err.rewind_to;
                last = Some(err);
            }
        }
    }
    match last {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn check_at(stored: &dyn ChainRules, new: &dyn ChainRules, head: u64) -> Option<ConfigMismatch> {
    for fork in Fork::ALL {
        let a = stored.activation(*fork);
        let b = new.activation(*fork);
        if is_fork_incompatible(a, b, head) {
            return Some(mismatch(format!("fork {}", fork), a, b));
        }
    }

    if stored.is_enabled(Fork::Eip155, head) && stored.chain_id() != new.chain_id() {
        return Some(mismatch(
            "chain id after EIP-155".to_string(),
            stored.activation(Fork::Eip155),
            new.activation(Fork::Eip155),
        ));
    }

    None
}

fn is_forked(activation: Option<u64>, head: u64) -> bool {
    activation.is_some_and(|at| at <= head)
}

fn is_fork_incompatible(a: Option<u64>, b: Option<u64>, head: u64) -> bool {
    (is_forked(a, head) || is_forked(b, head)) && a != b
}

fn mismatch(what: String, stored: Option<u64>, new: Option<u64>) -> ConfigMismatch {
    let rewind = match (stored, new) {
        (None, n) => n,
        (s, None) => s,
        (Some(s), Some(n)) => Some(s.min(n)),
    };
    ConfigMismatch {
        what,
        stored,
        new,
        rewind_to: rewind.filter(|r| *r > 0).map(|r| r - 1).unwrap_or(0),
    }
}
