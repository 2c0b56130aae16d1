// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("device entry '{0}' must not contain wildcards")]
    WildcardEntry(Entry),
}

/// The device class a selector applies to.
///
/// `All` only ever appears in allow lists; a selector carrying it is
/// wildcarded by definition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Block,
    Character,
    All,
}

impl DeviceType {
    fn as_char(self) -> char {
        match self {
            DeviceType::Block => 'b',
            DeviceType::Character => 'c',
            DeviceType::All => 'a',
        }
    }
}

/// Identifies a device or a class of devices. An absent major or minor
/// number matches every device number in that position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub dev_type: DeviceType,
    pub major: Option<u32>,
    pub minor: Option<u32>,
}

impl Selector {
    pub fn has_wildcard(&self) -> bool {
        self.dev_type == DeviceType::All || self.major.is_none() || self.minor.is_none()
    }

    /// Whether this selector covers `other`, field by field. Access bits
    /// are not part of the question, which is what separates selector
    /// matching from entry encompassment.
    pub fn matches(&self, other: &Selector) -> bool {
        (self.dev_type == DeviceType::All || self.dev_type == other.dev_type)
            && (self.major.is_none() || self.major == other.major)
            && (self.minor.is_none() || self.minor == other.minor)
    }
}

/// The operations an entry grants (in an allow list) or withholds (in a
/// deny list) on the selected devices.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub mknod: bool,
}

impl Access {
    pub fn none(&self) -> bool {
        !self.read && !self.write && !self.mknod
    }

    /// Clears every bit here that `other` has set.
    pub(crate) fn revoke(&mut self, other: &Access) {
        self.read = self.read && !other.read;
        self.write = self.write && !other.write;
        self.mknod = self.mknod && !other.mknod;
    }
}

/// One device access rule: a selector plus the access bits it carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub selector: Selector,
    pub access: Access,
}

impl Entry {
    /// Whether this entry covers `other`: the selector matches `other`'s
    /// selector and every access bit `other` carries is carried here too.
    /// Reflexive and transitive; an entry encompasses any weaker-access
    /// sibling on the same selector.
    pub fn encompasses(&self, other: &Entry) -> bool {
        self.selector.matches(&other.selector)
            && (self.access.read || !other.access.read)
            && (self.access.write || !other.access.write)
            && (self.access.mknod || !other.access.mknod)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let fmt_num = |num: Option<u32>| match num {
            Some(n) => n.to_string(),
            None => "*".to_string(),
        };

        let mut access = String::new();
        if self.access.read {
            access.push('r');
        }
        if self.access.write {
            access.push('w');
        }
        if self.access.mknod {
            access.push('m');
        }

        write!(
            f,
            "{} {}:{} {}",
            self.selector.dev_type.as_char(),
            fmt_num(self.selector.major),
            fmt_num(self.selector.minor),
            access
        )
    }
}

// Parses the cgroup device entry form "<type> <major>:<minor> <access>",
// e.g. "c 1:3 rw" or "a *:* rwm".
impl FromStr for Entry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(anyhow!(
                "device entry '{}' should have the form '<type> <major>:<minor> <access>'",
                s
            ));
        }

        let dev_type = match fields[0] {
            "a" => DeviceType::All,
            "b" => DeviceType::Block,
            "c" => DeviceType::Character,
            other => return Err(anyhow!("unknown device type '{}' in entry '{}'", other, s)),
        };

        let (major, minor) = fields[1]
            .split_once(':')
            .ok_or_else(|| anyhow!("missing ':' in device numbers of entry '{}'", s))?;
        let major = parse_device_number(major)
            .with_context(|| format!("bad major number in entry '{}'", s))?;
        let minor = parse_device_number(minor)
            .with_context(|| format!("bad minor number in entry '{}'", s))?;

        let mut access = Access::default();
        for flag in fields[2].chars() {
            let bit = match flag {
                'r' => &mut access.read,
                'w' => &mut access.write,
                'm' => &mut access.mknod,
                other => {
                    return Err(anyhow!("unknown access flag '{}' in entry '{}'", other, s));
                }
            };
            if *bit {
                return Err(anyhow!("duplicate access flag '{}' in entry '{}'", flag, s));
            }
            *bit = true;
        }

        Ok(Entry {
            selector: Selector {
                dev_type,
                major,
                minor,
            },
            access,
        })
    }
}

fn parse_device_number(num: &str) -> anyhow::Result<Option<u32>> {
    if num == "*" {
        return Ok(None);
    }
    let num = num
        .parse::<u32>()
        .with_context(|| format!("'{}' is neither a device number nor '*'", num))?;
    Ok(Some(num))
}

/// A device entry whose selector is statically known to be concrete.
///
/// Deny lists and reconfigure inputs reject wildcards, and the rejection
/// happens once, at construction: the only ways to obtain one of these are
/// `TryFrom<Entry>` and [`to_non_wildcards`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NonWildcardEntry(Entry);

impl NonWildcardEntry {
    pub fn entry(&self) -> &Entry {
        &self.0
    }

    pub fn into_entry(self) -> Entry {
        self.0
    }
}

impl TryFrom<Entry> for NonWildcardEntry {
    type Error = Error;

    fn try_from(entry: Entry) -> Result<Self, Error> {
        if entry.selector.has_wildcard() {
            return Err(Error::WildcardEntry(entry));
        }
        Ok(NonWildcardEntry(entry))
    }
}

/// Checks a whole list for wildcards, failing on the first offender.
pub fn to_non_wildcards(entries: &[Entry]) -> Result<Vec<NonWildcardEntry>, Error> {
    entries
        .iter()
        .map(|entry| NonWildcardEntry::try_from(*entry))
        .collect()
}

/// Widens checked entries back to plain entries.
pub fn to_entries(non_wildcards: &[NonWildcardEntry]) -> Vec<Entry> {
    non_wildcards.iter().map(|nw| nw.into_entry()).collect()
}
