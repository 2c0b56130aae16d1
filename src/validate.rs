// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::entry::Entry;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("allow entry '{allow}' cannot be encompassed by deny entry '{deny}'")]
    AllowEncompassedByDeny { allow: Entry, deny: Entry },
    #[error("addition '{addition}' cannot be encompassed by removal '{removal}'")]
    AdditionEncompassedByRemoval { addition: Entry, removal: Entry },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejects a configure request whose allow list is partly dead code: once
/// a deny entry encompasses an allow entry, the kernel can never grant the
/// allow and the caller's intent is ambiguous.
///
/// Inputs are taken as given; nothing is deduplicated or reordered. Deny
/// entries are expected to be concrete already.
pub fn check_configure(allow: &[Entry], deny: &[Entry]) -> Result<()> {
    for allow_entry in allow {
        for deny_entry in deny {
            if deny_entry.encompasses(allow_entry) {
                return Err(Error::AllowEncompassedByDeny {
                    allow: *allow_entry,
                    deny: *deny_entry,
                });
            }
        }
    }

    Ok(())
}

/// The same conflict applied to a reconfigure diff: an addition that a
/// removal in the same request encompasses would be revoked in the same
/// breath it is granted.
pub fn check_reconfigure(additions: &[Entry], removals: &[Entry]) -> Result<()> {
    for addition in additions {
        for removal in removals {
            if removal.encompasses(addition) {
                return Err(Error::AdditionEncompassedByRemoval {
                    addition: *addition,
                    removal: *removal,
                });
            }
        }
    }

    Ok(())
}
