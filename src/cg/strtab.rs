/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! String table (spec.md §4.3, component C3): an insertion-order interner
//! returning stable offsets bounded by the ISA's immediate field.

use std::collections::HashMap;

use crate::errors::CgError;

#[derive(Default)]
pub struct StrTab {
    buf: Vec<u8>,
    offsets: HashMap<String, u32>,
    max_offset: u32,
}

impl StrTab {
    pub fn new(max_offset: u32) -> Self {
        StrTab {
            buf: Vec::new(),
            offsets: HashMap::new(),
            max_offset,
        }
    }

    /// Interns `s`, returning its stable offset. Repeated insertions of
    /// the same string return the same offset.
    pub fn insert(&mut self, s: &str) -> Result<u32, CgError> {
        if let Some(&off) = self.offsets.get(s) {
            return Ok(off);
        }
        let off = self.buf.len() as u32;
        if off > self.max_offset {
            return Err(CgError::Str2Big {
                offset: off,
                max: self.max_offset,
            });
        }
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.offsets.insert(s.to_string(), off);
        Ok(off)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_strings_dedupe_to_the_same_offset() {
        let mut tab = StrTab::new(1024);
        let a = tab.insert("hello").unwrap();
        let b = tab.insert("world").unwrap();
        let a_again = tab.insert("hello").unwrap();
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(tab.as_bytes(), b"hello\0world\0");
    }

    #[test]
    fn insert_past_the_ceiling_is_str2big() {
        let mut tab = StrTab::new(4);
        tab.insert("abcd").unwrap();
        let err = tab.insert("e").unwrap_err();
        assert_eq!(err, CgError::Str2Big { offset: 5, max: 4 });
    }

    #[test]
    fn empty_table_reports_empty() {
        let tab = StrTab::new(64);
        assert!(tab.is_empty());
        assert_eq!(tab.len(), 0);
    }
}
