// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use core::fmt::Debug;

use anyhow::Result;

use crate::entry::Entry;

/// Port to the kernel-side cgroup v2 device controller.
///
/// An implementation installs the given rules for `cgroup`, atomically
/// from the caller's perspective, replacing whatever was installed before.
/// Wildcards are permitted in `allow` and forbidden in `deny`; the manager
/// only ever passes deny lists built from checked non-wildcard entries.
pub trait DeviceController: Send + Sync {
    fn apply(&self, cgroup: &str, allow: &[Entry], deny: &[Entry]) -> Result<()>;

    fn name(&self) -> &str;
}

impl Debug for dyn DeviceController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub mod mock {
    //! An in-memory device controller, for tests and for consumers that
    //! stage device access changes without touching the kernel.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};

    use super::DeviceController;
    use crate::entry::Entry;

    #[derive(Debug, Default)]
    pub struct MockController {
        inner: Mutex<Inner>,
    }

    #[derive(Debug, Default)]
    struct Inner {
        applied: HashMap<String, (Vec<Entry>, Vec<Entry>)>,
        fail_next: bool,
    }

    impl MockController {
        pub fn new() -> Self {
            Default::default()
        }

        /// Arms the controller to fail the next apply call.
        pub fn fail_next_apply(&self) {
            self.inner.lock().unwrap().fail_next = true;
        }

        /// The (allow, deny) rules last applied for `cgroup`, if any.
        pub fn applied(&self, cgroup: &str) -> Option<(Vec<Entry>, Vec<Entry>)> {
            self.inner.lock().unwrap().applied.get(cgroup).cloned()
        }
    }

    impl DeviceController for MockController {
        fn name(&self) -> &str {
            "mock"
        }

        fn apply(&self, cgroup: &str, allow: &[Entry], deny: &[Entry]) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();

            if inner.fail_next {
                inner.fail_next = false;
                return Err(anyhow!("injected apply failure for cgroup '{}'", cgroup));
            }

            if let Some(wildcard) = deny.iter().find(|e| e.selector.has_wildcard()) {
                return Err(anyhow!(
                    "deny entry '{}' for cgroup '{}' contains wildcards",
                    wildcard,
                    cgroup
                ));
            }

            inner
                .applied
                .insert(cgroup.to_string(), (allow.to_vec(), deny.to_vec()));

            Ok(())
        }
    }

}
