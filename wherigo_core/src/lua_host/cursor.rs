use super::guard::LuaGuard;
use super::value::{ScriptValue, TableRef};
use crate::error::Result;

/// Live enumeration over a Lua table.
///
/// Each step takes the interpreter lock on its own, so other threads may run
/// between steps. There is no snapshot: mutating the table while a cursor is
/// walking it gives undefined ordering, exactly like Lua's `next`.
pub struct TableCursor {
    guard: LuaGuard,
    table: TableRef,
    position: ScriptValue,
    finished: bool,
}

impl TableCursor {
    pub(crate) fn new(guard: LuaGuard, table: TableRef) -> Self {
        TableCursor {
            guard,
            table,
            position: ScriptValue::Nil,
            finished: false,
        }
    }

    /// Restarts from the first key.
    pub fn reset(&mut self) {
        self.position = ScriptValue::Nil;
        self.finished = false;
    }
}

impl Iterator for TableCursor {
    type Item = Result<(ScriptValue, ScriptValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let step = self.guard.next_pair(&self.table, &self.position);
        match self.guard.absorb(step) {
            Ok(Some((key, value))) => {
                self.position = key.clone();
                Some(Ok((key, value)))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lua_host::{GuardPolicy, LuaGuard};

    #[test]
    fn cursor_visits_every_pair_and_restarts() {
        let guard = LuaGuard::new(GuardPolicy::default()).expect("interpreter");
        guard
            .load(b"bag = { 'a', 'b', 'c', key = 'value' }", "test")
            .expect("chunk");
        let bag = guard.global("bag").expect("global");
        let bag = bag.as_table().expect("table");
        let mut cursor = guard.pairs(bag);
        let first: Vec<_> = cursor.by_ref().collect::<Result<_, _>>().expect("walk");
        assert_eq!(first.len(), 4);
        assert!(cursor.next().is_none());
        cursor.reset();
        assert_eq!(cursor.count(), 4);
    }

    #[test]
    fn cursor_over_disposed_interpreter_ends_quietly() {
        let guard = LuaGuard::new(GuardPolicy::default()).expect("interpreter");
        let table = guard.create_table().expect("table");
        guard.dispose().expect("dispose");
        assert_eq!(guard.pairs(&table).count(), 0);
    }
}
