use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// A handle to a string in the process-wide intern table.
///
/// Interning the same bytes twice returns handles to the same storage cell,
/// so equality and hashing compare the cell address rather than the string
/// contents. Handles are reference counted; the storage cell leaves the
/// table when the last handle outside the table is dropped.
pub struct InternedString {
    cell: Arc<str>,
}

fn table() -> MutexGuard<'static, HashSet<Arc<str>>> {
    static TABLE: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();
    TABLE
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Intern `s`, returning the canonical handle for its contents.
pub fn intern(s: &str) -> InternedString {
    let mut table = table();
    if let Some(cell) = table.get(s) {
        return InternedString {
            cell: Arc::clone(cell),
        };
    }
    let cell: Arc<str> = Arc::from(s);
    table.insert(Arc::clone(&cell));
    InternedString { cell }
}

impl InternedString {
    pub fn empty() -> Self {
        intern("")
    }

    pub fn as_str(&self) -> &str {
        &self.cell
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_empty()
    }
}

impl Clone for InternedString {
    fn clone(&self) -> Self {
        InternedString {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl Drop for InternedString {
    fn drop(&mut self) {
        // A count of 2 means this handle and the table's own reference are
        // the only ones left; retire the cell.
        if Arc::strong_count(&self.cell) == 2 {
            let mut table = table();
            if Arc::strong_count(&self.cell) == 2 {
                let contents: &str = &self.cell;
                table.remove(contents);
            }
        }
    }
}

impl Default for InternedString {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for InternedString {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.cell) as *const u8 as usize);
    }
}

impl Deref for InternedString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.cell
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cell)
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.cell, f)
    }
}

impl From<&str> for InternedString {
    fn from(s: &str) -> Self {
        intern(s)
    }
}

#[cfg(test)]
fn is_interned(s: &str) -> bool {
    table().contains(s)
}
