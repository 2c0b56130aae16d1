// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};

use crate::entry::{to_entries, Access, Entry, NonWildcardEntry};

/// Intended device access state for one cgroup: the rules the kernel-side
/// controller should install. Effective policy is allow minus deny.
///
/// The deny list never contains wildcarded selectors. A wildcard allow
/// entry grants bits for a whole device class and cannot be narrowed in
/// place without changing access for unrelated devices, so exceptions to
/// it are carved out as concrete deny entries instead.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupDeviceAccess {
    pub allow_list: Vec<Entry>,
    pub deny_list: Vec<Entry>,
}

/// Returns `state` with `additions` granted and `removals` revoked.
///
/// Additions are applied before removals, each in caller order. An
/// addition clears its access bits from any concrete deny entry on the
/// same device, then joins the allow list. A removal clears its bits from
/// concrete allow entries on the same device; bits granted only by
/// wildcard allow entries are recorded as a new deny entry, restricted to
/// the bits those wildcards actually grant. A removal that matches no
/// allow entry at all is a no-op: there is nothing granted to revoke.
/// Entries left with no access bits are dropped from both lists.
pub fn apply_diff(
    state: &CgroupDeviceAccess,
    additions: &[NonWildcardEntry],
    removals: &[NonWildcardEntry],
) -> CgroupDeviceAccess {
    let mut new_state = state.clone();
    let additions = to_entries(additions);
    let removals = to_entries(removals);

    for addition in &additions {
        // The deny list holds no wildcards, so an exact selector
        // comparison finds every deny entry the addition re-grants.
        for deny_entry in new_state.deny_list.iter_mut() {
            revoke_accesses(deny_entry, addition);
        }

        new_state.allow_list.push(*addition);
    }

    for removal in &removals {
        // Bits granted to this device by wildcard allow entries. Those
        // cannot be revoked in place; whatever they grant of the removal
        // must become a deny entry.
        let mut covered = Access::default();

        for allow_entry in new_state.allow_list.iter_mut() {
            if allow_entry.selector.has_wildcard() {
                if allow_entry.selector.matches(&removal.selector) {
                    covered.read |= allow_entry.access.read;
                    covered.write |= allow_entry.access.write;
                    covered.mknod |= allow_entry.access.mknod;
                }
            } else {
                revoke_accesses(allow_entry, removal);
            }
        }

        // Only the bits the wildcards actually grant go into the deny
        // list; the rest of the removal was already revoked in place.
        let effective_deny = Access {
            read: removal.access.read && covered.read,
            write: removal.access.write && covered.write,
            mknod: removal.access.mknod && covered.mknod,
        };

        if !effective_deny.none() {
            new_state.deny_list.push(Entry {
                selector: removal.selector,
                access: effective_deny,
            });
        }
    }

    new_state.allow_list.retain(|entry| !entry.access.none());
    new_state.deny_list.retain(|entry| !entry.access.none());

    new_state
}

// Clears from `entry` every access bit `diff_entry` carries, if the two
// name the same concrete device.
fn revoke_accesses(entry: &mut Entry, diff_entry: &Entry) {
    debug_assert!(!entry.selector.has_wildcard());
    debug_assert!(!diff_entry.selector.has_wildcard());

    if entry.selector == diff_entry.selector {
        entry.access.revoke(&diff_entry.access);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::to_non_wildcards;

    fn entries(list: &[&str]) -> Vec<Entry> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn non_wildcards(list: &[&str]) -> Vec<NonWildcardEntry> {
        to_non_wildcards(&entries(list)).unwrap()
    }

    fn state(allow: &[&str], deny: &[&str]) -> CgroupDeviceAccess {
        CgroupDeviceAccess {
            allow_list: entries(allow),
            deny_list: entries(deny),
        }
    }

    #[test]
    fn test_apply_diff() {
        #[derive(Debug)]
        struct TestData<'a> {
            allow: &'a [&'a str],
            deny: &'a [&'a str],
            additions: &'a [&'a str],
            removals: &'a [&'a str],
            expect_allow: &'a [&'a str],
            expect_deny: &'a [&'a str],
        }

        let tests = &[
            // Remove accesses from an existing allow entry.
            TestData {
                allow: &["c 3:1 rwm"],
                deny: &[],
                additions: &[],
                removals: &["c 3:1 rm"],
                expect_allow: &["c 3:1 w"],
                expect_deny: &[],
            },
            // An addition clears matching deny entry accesses.
            TestData {
                allow: &["c 3:* rwm"],
                deny: &["c 3:1 rwm"],
                additions: &["c 3:1 rm"],
                removals: &[],
                expect_allow: &["c 3:* rwm", "c 3:1 rm"],
                expect_deny: &["c 3:1 w"],
            },
            // Remove an entire allow entry.
            TestData {
                allow: &["c 3:1 rm"],
                deny: &[],
                additions: &[],
                removals: &["c 3:1 rwm"],
                expect_allow: &[],
                expect_deny: &[],
            },
            // An addition wipes out an entire deny entry.
            TestData {
                allow: &["c 3:* rm"],
                deny: &["c 3:1 rm"],
                additions: &["c 3:1 rm"],
                removals: &[],
                expect_allow: &["c 3:* rm", "c 3:1 rm"],
                expect_deny: &[],
            },
            // Overlapping entries where neither encompasses the other.
            TestData {
                allow: &["c 3:* rm"],
                deny: &["c 3:1 rm"],
                additions: &["c 3:1 rw"],
                removals: &[],
                expect_allow: &["c 3:* rm", "c 3:1 rw"],
                expect_deny: &["c 3:1 m"],
            },
            // A removal overlapping a wildcard that does not encompass
            // it: only the wildcard-granted bits reach the deny list.
            TestData {
                allow: &["c 3:* rm"],
                deny: &[],
                additions: &[],
                removals: &["c 3:1 rw"],
                expect_allow: &["c 3:* rm"],
                expect_deny: &["c 3:1 r"],
            },
            // Narrowing a wildcard allow never modifies the wildcard.
            TestData {
                allow: &["c 3:* rm"],
                deny: &[],
                additions: &[],
                removals: &["c 3:1 r"],
                expect_allow: &["c 3:* rm"],
                expect_deny: &["c 3:1 r"],
            },
            // The "all" wildcard covers both device types.
            TestData {
                allow: &["a *:* m"],
                deny: &[],
                additions: &[],
                removals: &["b 8:0 rm"],
                expect_allow: &["a *:* m"],
                expect_deny: &["b 8:0 m"],
            },
            // Bits granted by several wildcards accumulate.
            TestData {
                allow: &["c 3:* r", "c *:1 w"],
                deny: &[],
                additions: &[],
                removals: &["c 3:1 rwm"],
                expect_allow: &["c 3:* r", "c *:1 w"],
                expect_deny: &["c 3:1 rw"],
            },
            // A wildcard on a different class contributes nothing.
            TestData {
                allow: &["b *:* rwm"],
                deny: &[],
                additions: &[],
                removals: &["c 3:1 rw"],
                expect_allow: &["b *:* rwm"],
                expect_deny: &[],
            },
            // Additions and removals in one diff, additions first.
            TestData {
                allow: &["c 3:* rwm"],
                deny: &["c 1:3 w"],
                additions: &["c 1:3 rw"],
                removals: &["c 3:1 w"],
                expect_allow: &["c 3:* rwm", "c 1:3 rw"],
                expect_deny: &["c 3:1 w"],
            },
        ];

        for (i, d) in tests.iter().enumerate() {
            let msg = format!("test[{}]: {:?}", i, d);

            let result = apply_diff(
                &state(d.allow, d.deny),
                &non_wildcards(d.additions),
                &non_wildcards(d.removals),
            );

            assert_eq!(result.allow_list, entries(d.expect_allow), "{}", msg);
            assert_eq!(result.deny_list, entries(d.expect_deny), "{}", msg);
        }
    }

    #[test]
    fn test_empty_diff_is_identity() {
        let s = state(&["c 3:* rm", "c 1:3 w"], &["c 3:1 r"]);
        assert_eq!(apply_diff(&s, &[], &[]), s);

        let empty = CgroupDeviceAccess::default();
        assert_eq!(apply_diff(&empty, &[], &[]), empty);
    }

    #[test]
    fn test_removal_of_ungranted_is_noop() {
        let s = state(&["c 1:3 r"], &["c 3:1 w"]);
        assert_eq!(apply_diff(&s, &[], &non_wildcards(&["b 8:0 rwm"])), s);
    }

    // Applying disjoint-selector additions and removals in either order
    // gives the same state.
    #[test]
    fn test_disjoint_diffs_commute() {
        let s = state(&["c 3:* rm"], &[]);
        let additions = non_wildcards(&["b 8:0 rw"]);
        let removals = non_wildcards(&["c 3:1 r"]);

        let add_first = apply_diff(&apply_diff(&s, &additions, &[]), &[], &removals);
        let remove_first = apply_diff(&apply_diff(&s, &[], &removals), &additions, &[]);
        assert_eq!(add_first, remove_first);
    }

    // With overlapping selectors the defined order (additions before
    // removals) matters: add-then-remove cancels out, while a removal
    // that precedes the grant revokes nothing.
    #[test]
    fn test_overlapping_diffs_do_not_commute() {
        let empty = CgroupDeviceAccess::default();
        let x = non_wildcards(&["c 3:1 w"]);

        let granted_then_revoked = apply_diff(&apply_diff(&empty, &x, &[]), &[], &x);
        assert_eq!(granted_then_revoked, empty);

        let revoked_then_granted = apply_diff(&apply_diff(&empty, &[], &x), &x, &[]);
        assert_eq!(revoked_then_granted, state(&["c 3:1 w"], &[]));
    }

    // Granting a previously-unknown device and then revoking it restores
    // the original state.
    #[test]
    fn test_grant_then_revoke_round_trip() {
        let s = state(&["c 1:3 r"], &["c 3:1 w"]);
        let x = non_wildcards(&["b 8:0 rw"]);

        assert_eq!(apply_diff(&apply_diff(&s, &x, &[]), &[], &x), s);
    }

    // Every state the algebra produces keeps the deny list concrete, both
    // lists free of empty-access entries, and no allow entry dead under
    // the deny list.
    #[test]
    fn test_output_invariants() {
        let cases = &[
            (
                state(&["a *:* rwm", "c 3:1 rwm"], &[]),
                non_wildcards(&["c 3:1 rm"]),
                non_wildcards(&["b 8:0 w", "c 3:1 w"]),
            ),
            (
                state(&["c 3:* rm"], &["c 3:1 rm"]),
                non_wildcards(&["c 3:1 rm"]),
                non_wildcards(&["c 3:2 rm"]),
            ),
        ];

        for (s, additions, removals) in cases {
            let result = apply_diff(s, additions, removals);

            for deny in &result.deny_list {
                assert!(!deny.selector.has_wildcard(), "wildcard in {:?}", result);
            }
            for entry in result.allow_list.iter().chain(result.deny_list.iter()) {
                assert!(!entry.access.none(), "empty entry in {:?}", result);
            }
            for allow in &result.allow_list {
                for deny in &result.deny_list {
                    assert!(
                        !deny.encompasses(allow),
                        "allow '{}' dead under deny '{}' in {:?}",
                        allow,
                        deny,
                        result
                    );
                }
            }
        }
    }
}
