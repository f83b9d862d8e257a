//! Directory entries and the per-storage red-black trees linking them.

use std::cmp::Ordering;

use crate::header::CfbVersion;
use crate::sector::{SectorId, ENDOFCHAIN};
use crate::CfbError;

/// Index of an entry in the directory table.
pub type DirectoryId = u32;

/// Absent sibling/child link.
pub const NOSTREAM: DirectoryId = 0xFFFF_FFFF;
/// Largest id that refers to a real directory entry.
pub const MAXREGSID: DirectoryId = 0xFFFF_FFFA;
pub const DIRECTORY_ENTRY_LEN: usize = 128;
pub const ROOT_ENTRY_NAME: &str = "Root Entry";
/// Maximum name length in UTF-16 code units, excluding the terminator.
pub const MAX_NAME_UNITS: usize = 31;

const ILLEGAL_NAME_CHARS: [char; 4] = ['/', '\\', ':', '!'];

const OFFSET_NAME_LEN: usize = 0x40;
const OFFSET_TYPE: usize = 0x42;
const OFFSET_COLOR: usize = 0x43;
const OFFSET_LEFT: usize = 0x44;
const OFFSET_RIGHT: usize = 0x48;
const OFFSET_CHILD: usize = 0x4C;
const OFFSET_CLSID: usize = 0x50;
const OFFSET_STATE: usize = 0x60;
const OFFSET_CREATED: usize = 0x64;
const OFFSET_MODIFIED: usize = 0x6C;
const OFFSET_START: usize = 0x74;
const OFFSET_SIZE: usize = 0x78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Empty,
    UserStorage,
    UserStream,
    RootStorage,
}

impl EntryType {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(EntryType::Empty),
            1 => Some(EntryType::UserStorage),
            2 => Some(EntryType::UserStream),
            5 => Some(EntryType::RootStorage),
            _ => None,
        }
    }

    fn raw(self) -> u8 {
        match self {
            EntryType::Empty => 0,
            EntryType::UserStorage => 1,
            EntryType::UserStream => 2,
            EntryType::RootStorage => 5,
        }
    }

    /// Storages (including the root) own a child tree.
    pub fn is_storage(self) -> bool {
        matches!(self, EntryType::UserStorage | EntryType::RootStorage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub color: Color,
    pub left_sibling: DirectoryId,
    pub right_sibling: DirectoryId,
    pub child: DirectoryId,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    /// FILETIME, kept raw.
    pub created: u64,
    pub modified: u64,
    pub start_sector: SectorId,
    pub size: u64,
}

impl DirectoryEntry {
    pub fn empty() -> Self {
        Self::new(String::new(), EntryType::Empty)
    }

    pub fn root() -> Self {
        let mut entry = Self::new(ROOT_ENTRY_NAME.to_string(), EntryType::RootStorage);
        entry.color = Color::Black;
        entry
    }

    pub(crate) fn new(name: String, entry_type: EntryType) -> Self {
        Self {
            name,
            entry_type,
            color: Color::Red,
            left_sibling: NOSTREAM,
            right_sibling: NOSTREAM,
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_sector: ENDOFCHAIN,
            size: 0,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::UserStream
    }

    pub fn is_storage(&self) -> bool {
        self.entry_type.is_storage()
    }

    /// Decode the 128-byte entry `id`.
    pub fn decode(
        id: DirectoryId,
        raw: &[u8; DIRECTORY_ENTRY_LEN],
        version: CfbVersion,
    ) -> Result<Self, CfbError> {
        let entry_type = EntryType::from_raw(raw[OFFSET_TYPE]).ok_or_else(|| {
            CfbError::malformed(format!(
                "directory entry {id}: invalid object type {:#04x}",
                raw[OFFSET_TYPE]
            ))
        })?;
        if entry_type == EntryType::Empty {
            return Ok(Self::empty());
        }

        let name_len = u16::from_le_bytes([raw[OFFSET_NAME_LEN], raw[OFFSET_NAME_LEN + 1]]);
        validate_name_len(name_len).map_err(|err| match err {
            CfbError::Malformed(reason) => CfbError::malformed(format!("directory entry {id}: {reason}")),
            other => other,
        })?;
        let units: Vec<u16> = raw[..usize::from(name_len)]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let Some((&0, name_units)) = units.split_last() else {
            return Err(CfbError::malformed(format!(
                "directory entry {id}: name is not NUL-terminated"
            )));
        };
        let name = String::from_utf16(name_units).map_err(|_| {
            CfbError::malformed(format!("directory entry {id}: name is not valid UTF-16"))
        })?;
        if let Some(bad) = name.chars().find(|c| ILLEGAL_NAME_CHARS.contains(c) || *c == '\0') {
            return Err(CfbError::malformed(format!(
                "directory entry {id}: name contains illegal character {:#06x}",
                u32::from(bad)
            )));
        }

        let color = match raw[OFFSET_COLOR] {
            0 => Color::Red,
            1 => Color::Black,
            other => {
                return Err(CfbError::malformed(format!(
                    "directory entry {id}: invalid color {other:#04x}"
                )))
            }
        };

        let u32_at = |offset: usize| {
            u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
        };
        let u64_at = |offset: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        };

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&raw[OFFSET_CLSID..OFFSET_CLSID + 16]);

        let mut size = u64_at(OFFSET_SIZE);
        if version == CfbVersion::V3 {
            // Version 3 writers may leave garbage in the high dword.
            size &= 0xFFFF_FFFF;
        }

        Ok(Self {
            name,
            entry_type,
            color,
            left_sibling: u32_at(OFFSET_LEFT),
            right_sibling: u32_at(OFFSET_RIGHT),
            child: u32_at(OFFSET_CHILD),
            clsid,
            state_bits: u32_at(OFFSET_STATE),
            created: u64_at(OFFSET_CREATED),
            modified: u64_at(OFFSET_MODIFIED),
            start_sector: u32_at(OFFSET_START),
            size,
        })
    }

    pub fn encode(&self) -> [u8; DIRECTORY_ENTRY_LEN] {
        let mut raw = [0u8; DIRECTORY_ENTRY_LEN];
        if self.entry_type != EntryType::Empty {
            let mut units = 0usize;
            for (index, unit) in self.name.encode_utf16().take(MAX_NAME_UNITS).enumerate() {
                raw[index * 2..index * 2 + 2].copy_from_slice(&unit.to_le_bytes());
                units += 1;
            }
            let name_len = ((units + 1) * 2) as u16;
            raw[OFFSET_NAME_LEN..OFFSET_NAME_LEN + 2].copy_from_slice(&name_len.to_le_bytes());
        }
        raw[OFFSET_TYPE] = self.entry_type.raw();
        raw[OFFSET_COLOR] = match self.color {
            Color::Red => 0,
            Color::Black => 1,
        };
        raw[OFFSET_LEFT..OFFSET_LEFT + 4].copy_from_slice(&self.left_sibling.to_le_bytes());
        raw[OFFSET_RIGHT..OFFSET_RIGHT + 4].copy_from_slice(&self.right_sibling.to_le_bytes());
        raw[OFFSET_CHILD..OFFSET_CHILD + 4].copy_from_slice(&self.child.to_le_bytes());
        raw[OFFSET_CLSID..OFFSET_CLSID + 16].copy_from_slice(&self.clsid);
        raw[OFFSET_STATE..OFFSET_STATE + 4].copy_from_slice(&self.state_bits.to_le_bytes());
        raw[OFFSET_CREATED..OFFSET_CREATED + 8].copy_from_slice(&self.created.to_le_bytes());
        raw[OFFSET_MODIFIED..OFFSET_MODIFIED + 8].copy_from_slice(&self.modified.to_le_bytes());
        raw[OFFSET_START..OFFSET_START + 4].copy_from_slice(&self.start_sector.to_le_bytes());
        raw[OFFSET_SIZE..OFFSET_SIZE + 8].copy_from_slice(&self.size.to_le_bytes());
        raw
    }
}

/// Check a stored name length (in bytes, terminator included).
pub fn validate_name_len(len: u16) -> Result<(), CfbError> {
    if len < 2 || len > 64 || len % 2 != 0 {
        return Err(CfbError::malformed(format!(
            "invalid name length {len:#06x} (must be even and between 2 and 64)"
        )));
    }
    Ok(())
}

/// Check a caller-supplied entry name before it is stored.
pub fn validate_name(name: &str) -> Result<(), CfbError> {
    let reject = |reason: &'static str| {
        Err(CfbError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return reject("name is empty");
    }
    if name.encode_utf16().count() > MAX_NAME_UNITS {
        return reject("name is longer than 31 UTF-16 code units");
    }
    if name.contains('\0') {
        return reject("name contains NUL");
    }
    if name.contains(&ILLEGAL_NAME_CHARS[..]) {
        return reject("name contains one of `/`, `\\`, `:`, `!`");
    }
    Ok(())
}

/// Sibling ordering used by every storage's tree: shorter names first, then a
/// case-insensitive comparison. Other readers descend the tree with this same comparator,
/// so a purely case-insensitive order would hide entries from them.
pub fn compare_names(left: &str, right: &str) -> Ordering {
    left.encode_utf16()
        .count()
        .cmp(&right.encode_utf16().count())
        .then_with(|| left.to_uppercase().cmp(&right.to_uppercase()))
}

/// Entry arena plus the parent links the on-disk format does not store.
#[derive(Debug, Clone, Default)]
pub(crate) struct Directory {
    entries: Vec<DirectoryEntry>,
    tree_parent: Vec<DirectoryId>,
    storage_parent: Vec<DirectoryId>,
}

impl Directory {
    /// Validate the trees of a freshly decoded table and rebuild the parent links.
    pub(crate) fn from_entries(entries: Vec<DirectoryEntry>) -> Result<Self, CfbError> {
        let root = entries
            .first()
            .ok_or_else(|| CfbError::malformed("directory has no entries"))?;
        if root.entry_type != EntryType::RootStorage {
            return Err(CfbError::malformed(format!(
                "directory entry 0 has type {:?}, expected root storage",
                root.entry_type
            )));
        }
        if let Some(extra) = entries
            .iter()
            .skip(1)
            .position(|entry| entry.entry_type == EntryType::RootStorage)
        {
            return Err(CfbError::malformed(format!(
                "directory entry {} is a second root storage",
                extra + 1
            )));
        }

        let len = entries.len();
        let mut directory = Directory {
            entries,
            tree_parent: vec![NOSTREAM; len],
            storage_parent: vec![NOSTREAM; len],
        };

        let mut visited = vec![false; len];
        visited[0] = true;
        let mut storages = vec![0 as DirectoryId];
        while let Some(storage) = storages.pop() {
            let child = directory.entries[storage as usize].child;
            let mut pending = Vec::new();
            if directory.check_link(storage, child)? {
                pending.push((child, NOSTREAM));
            }
            while let Some((id, parent)) = pending.pop() {
                let index = id as usize;
                if visited[index] {
                    return Err(CfbError::malformed(format!(
                        "directory entry {id} is linked more than once (cycle in storage {storage})"
                    )));
                }
                visited[index] = true;
                let entry = &directory.entries[index];
                if entry.entry_type == EntryType::Empty {
                    return Err(CfbError::malformed(format!(
                        "directory entry {id} is linked from storage {storage} but is unallocated"
                    )));
                }
                let (left, right, is_storage) =
                    (entry.left_sibling, entry.right_sibling, entry.is_storage());
                directory.tree_parent[index] = parent;
                directory.storage_parent[index] = storage;
                for link in [left, right] {
                    if directory.check_link(id, link)? {
                        pending.push((link, id));
                    }
                }
                if is_storage {
                    storages.push(id);
                }
            }
        }

        let orphans = visited.iter().enumerate().filter(|(index, seen)| {
            !**seen && directory.entries[*index].entry_type != EntryType::Empty
        });
        for (index, _) in orphans {
            log::debug!("directory entry {index} is allocated but unreachable from the root");
        }
        Ok(directory)
    }

    fn check_link(&self, from: DirectoryId, link: DirectoryId) -> Result<bool, CfbError> {
        if link == NOSTREAM {
            return Ok(false);
        }
        if link > MAXREGSID || link as usize >= self.entries.len() {
            return Err(CfbError::malformed(format!(
                "directory entry {from} links to invalid entry {link:#010x} ({} entries)",
                self.entries.len()
            )));
        }
        Ok(true)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entry(&self, id: DirectoryId) -> &DirectoryEntry {
        &self.entries[id as usize]
    }

    pub(crate) fn entry_mut(&mut self, id: DirectoryId) -> &mut DirectoryEntry {
        &mut self.entries[id as usize]
    }

    /// Append `count` unallocated entries.
    pub(crate) fn grow(&mut self, count: usize) {
        let len = self.entries.len() + count;
        self.entries.resize(len, DirectoryEntry::empty());
        self.tree_parent.resize(len, NOSTREAM);
        self.storage_parent.resize(len, NOSTREAM);
    }

    pub(crate) fn first_empty(&self) -> Option<DirectoryId> {
        self.entries
            .iter()
            .position(|entry| entry.entry_type == EntryType::Empty)
            .map(|index| index as DirectoryId)
    }

    /// The storage owning `id`, if `id` is linked into the tree.
    pub(crate) fn storage_parent(&self, id: DirectoryId) -> Option<DirectoryId> {
        self.storage_parent
            .get(id as usize)
            .copied()
            .filter(|parent| *parent != NOSTREAM)
    }

    fn is_linked(&self, id: DirectoryId) -> bool {
        id == 0 || self.storage_parent(id).is_some()
    }

    fn left(&self, id: DirectoryId) -> DirectoryId {
        self.entries[id as usize].left_sibling
    }

    fn right(&self, id: DirectoryId) -> DirectoryId {
        self.entries[id as usize].right_sibling
    }

    fn parent(&self, id: DirectoryId) -> DirectoryId {
        if id == NOSTREAM {
            NOSTREAM
        } else {
            self.tree_parent[id as usize]
        }
    }

    fn color(&self, id: DirectoryId) -> Color {
        if id == NOSTREAM {
            Color::Black
        } else {
            self.entries[id as usize].color
        }
    }

    fn set_color(&mut self, id: DirectoryId, color: Color) {
        if id != NOSTREAM {
            self.entries[id as usize].color = color;
        }
    }

    /// Replace `old` by `new` in the link pointing at `old` (or the storage's child link).
    fn replace_child(&mut self, storage: DirectoryId, parent: DirectoryId, old: DirectoryId, new: DirectoryId) {
        if parent == NOSTREAM {
            self.entries[storage as usize].child = new;
        } else if self.left(parent) == old {
            self.entries[parent as usize].left_sibling = new;
        } else {
            self.entries[parent as usize].right_sibling = new;
        }
    }

    fn rotate_left(&mut self, storage: DirectoryId, x: DirectoryId) {
        let y = self.right(x);
        let y_left = self.left(y);
        self.entries[x as usize].right_sibling = y_left;
        if y_left != NOSTREAM {
            self.tree_parent[y_left as usize] = x;
        }
        let x_parent = self.parent(x);
        self.tree_parent[y as usize] = x_parent;
        self.replace_child(storage, x_parent, x, y);
        self.entries[y as usize].left_sibling = x;
        self.tree_parent[x as usize] = y;
    }

    fn rotate_right(&mut self, storage: DirectoryId, x: DirectoryId) {
        let y = self.left(x);
        let y_right = self.right(y);
        self.entries[x as usize].left_sibling = y_right;
        if y_right != NOSTREAM {
            self.tree_parent[y_right as usize] = x;
        }
        let x_parent = self.parent(x);
        self.tree_parent[y as usize] = x_parent;
        self.replace_child(storage, x_parent, x, y);
        self.entries[y as usize].right_sibling = x;
        self.tree_parent[x as usize] = y;
    }

    /// Link the already-populated entry `id` into `storage`'s tree.
    pub(crate) fn tree_insert(&mut self, storage: DirectoryId, id: DirectoryId) {
        {
            let entry = &mut self.entries[id as usize];
            entry.left_sibling = NOSTREAM;
            entry.right_sibling = NOSTREAM;
            entry.color = Color::Red;
        }
        self.storage_parent[id as usize] = storage;

        let mut parent = NOSTREAM;
        let mut cursor = self.entries[storage as usize].child;
        let mut goes_left = false;
        while cursor != NOSTREAM {
            parent = cursor;
            goes_left = compare_names(&self.entries[id as usize].name, &self.entries[cursor as usize].name)
                == Ordering::Less;
            cursor = if goes_left { self.left(cursor) } else { self.right(cursor) };
        }

        self.tree_parent[id as usize] = parent;
        if parent == NOSTREAM {
            self.entries[storage as usize].child = id;
        } else if goes_left {
            self.entries[parent as usize].left_sibling = id;
        } else {
            self.entries[parent as usize].right_sibling = id;
        }
        self.tree_insert_fixup(storage, id);
    }

    fn tree_insert_fixup(&mut self, storage: DirectoryId, mut node: DirectoryId) {
        while self.color(self.parent(node)) == Color::Red {
            let parent = self.parent(node);
            let grandparent = self.parent(parent);
            if grandparent == NOSTREAM {
                // Red subtree root inherited from a foreign writer.
                break;
            }
            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.color(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                if node == self.right(parent) {
                    node = parent;
                    self.rotate_left(storage, node);
                }
                let parent = self.parent(node);
                let grandparent = self.parent(parent);
                self.set_color(parent, Color::Black);
                self.set_color(grandparent, Color::Red);
                self.rotate_right(storage, grandparent);
            } else {
                let uncle = self.left(grandparent);
                if self.color(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                if node == self.left(parent) {
                    node = parent;
                    self.rotate_right(storage, node);
                }
                let parent = self.parent(node);
                let grandparent = self.parent(parent);
                self.set_color(parent, Color::Black);
                self.set_color(grandparent, Color::Red);
                self.rotate_left(storage, grandparent);
            }
        }
        let root = self.entries[storage as usize].child;
        self.set_color(root, Color::Black);
    }

    /// Children of `storage` in sibling order.
    pub(crate) fn children(&self, storage: DirectoryId) -> Vec<DirectoryId> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut cursor = self.entries[storage as usize].child;
        loop {
            while cursor != NOSTREAM {
                stack.push(cursor);
                cursor = self.left(cursor);
            }
            match stack.pop() {
                Some(id) => {
                    out.push(id);
                    cursor = self.right(id);
                }
                None => break,
            }
        }
        out
    }

    pub(crate) fn find_child(&self, storage: DirectoryId, name: &str) -> Option<DirectoryId> {
        self.children(storage)
            .into_iter()
            .find(|id| compare_names(&self.entries[*id as usize].name, name) == Ordering::Equal)
    }

    /// Every linked entry below the root, parents before their children.
    pub(crate) fn walk(&self) -> Vec<DirectoryId> {
        let mut out = Vec::new();
        let mut stack: Vec<DirectoryId> = self.children(0).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if self.entries[id as usize].is_storage() {
                stack.extend(self.children(id).into_iter().rev());
            }
        }
        out
    }

    /// `/`-joined path of `id`, rebuilt from the parent-storage links.
    pub(crate) fn tree_path(&self, id: DirectoryId) -> String {
        let mut parts = Vec::new();
        let mut cursor = id;
        while cursor != 0 && cursor != NOSTREAM {
            parts.push(self.entries[cursor as usize].name.as_str());
            cursor = self.storage_parent[cursor as usize];
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Linear scan for the entry whose path matches `path` (case-insensitively).
    pub(crate) fn find_entry(
        &self,
        path: &str,
        accept: impl Fn(EntryType) -> bool,
    ) -> Option<DirectoryId> {
        let wanted = normalize_path(path).to_uppercase();
        (0..self.entries.len() as DirectoryId).find(|&id| {
            let entry = &self.entries[id as usize];
            entry.entry_type != EntryType::Empty
                && accept(entry.entry_type)
                && self.is_linked(id)
                && self.tree_path(id).to_uppercase() == wanted
        })
    }
}

/// Canonical `/a/b` form of a user-supplied path.
pub(crate) fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// Split `/a/b/c` into (`/a/b`, `c`).
pub(crate) fn split_path(path: &str) -> Option<(String, String)> {
    let normalized = normalize_path(path);
    let (parent, name) = normalized.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    let parent = if parent.is_empty() { "/" } else { parent };
    Some((parent.to_string(), name.to_string()))
}
