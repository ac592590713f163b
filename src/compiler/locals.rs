//! Local variable slots and their scopes.
//!
//! Each definition opens a scope covering the instructions emitted until it
//! is undefined. Redefining a name nests a child scope under the previous
//! definition. Boxing a variable rewrites every access to its slot within
//! its scope, skipping child scopes.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use super::instructions::InstructionList;
use crate::vm::{BuildError, Slot};

/// How a variable is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    /// Local slot, or closure cell index when `in_closure`.
    pub index: usize,
    pub in_closure: bool,
    pub is_boxed: bool,
}

impl LocalVariable {
    pub fn slot(&self) -> Slot {
        match (self.in_closure, self.is_boxed) {
            (true, _) => Slot::Closure(self.index),
            (false, true) => Slot::Boxed(self.index),
            (false, false) => Slot::Local(self.index),
        }
    }
}

/// Returned by `define_local`; pass it back to `undefine_local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDefinition {
    scope: usize,
}

#[derive(Debug)]
struct VariableScope<K> {
    key: K,
    variable: LocalVariable,
    start: usize,
    stop: Option<usize>,
    parent: Option<usize>,
    children: Vec<usize>,
}

#[derive(Debug)]
pub struct LocalVariables<K> {
    scopes: Vec<VariableScope<K>>,
    active: HashMap<K, usize>,
    closure_variables: HashMap<K, LocalVariable>,
    live: usize,
    local_count: usize,
}

impl<K: Eq + Hash + Clone> Default for LocalVariables<K> {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            active: HashMap::new(),
            closure_variables: HashMap::new(),
            live: 0,
            local_count: 0,
        }
    }
}

impl<K: Eq + Hash + Clone> LocalVariables<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots needed by the program: the most locals live at once.
    pub fn local_count(&self) -> usize {
        self.local_count
    }

    /// Allocate a slot for `key`, starting its scope at instruction `start`.
    pub fn define_local(&mut self, key: K, start: usize) -> LocalDefinition {
        let variable = LocalVariable {
            index: self.live,
            in_closure: false,
            is_boxed: false,
        };
        self.live += 1;
        self.local_count = self.local_count.max(self.live);

        let scope = self.scopes.len();
        let parent = self.active.get(&key).copied();
        if let Some(parent) = parent {
            self.scopes[parent].children.push(scope);
        }
        self.scopes.push(VariableScope {
            key: key.clone(),
            variable,
            start,
            stop: None,
            parent,
            children: Vec::new(),
        });
        self.active.insert(key, scope);
        LocalDefinition { scope }
    }

    /// Close a scope at instruction `end`. Definitions are undefined in
    /// reverse order, so the slot is the next one handed out again.
    pub fn undefine_local(&mut self, definition: LocalDefinition, end: usize) {
        let Some(scope) = self.scopes.get_mut(definition.scope) else {
            return;
        };
        if scope.stop.is_some() {
            return;
        }
        scope.stop = Some(end);
        let key = scope.key.clone();
        match scope.parent {
            Some(parent) => {
                self.active.insert(key, parent);
            }
            None => {
                self.active.remove(&key);
            }
        }
        self.live = self.live.saturating_sub(1);
    }

    /// Bind `key` to cell `index` of the enclosing closure.
    pub fn add_closure_variable(&mut self, key: K, index: usize) -> LocalVariable {
        let variable = LocalVariable {
            index,
            in_closure: true,
            is_boxed: false,
        };
        self.closure_variables.insert(key, variable);
        variable
    }

    pub fn get<Q>(&self, key: &Q) -> Option<LocalVariable>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.active.get(key) {
            Some(scope) => Some(self.scopes[*scope].variable),
            None => self.closure_variables.get(key).copied(),
        }
    }

    /// Move `key` into a cell so closures can share it. Accesses already
    /// emitted within its scope are rewritten to the boxed forms.
    pub fn box_variable<Q>(&mut self, key: &Q, instructions: &mut InstructionList) -> Result<(), BuildError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(&id) = self.active.get(key) else {
            return Err(if self.closure_variables.contains_key(key) {
                BuildError::BoxedClosureVariable
            } else {
                BuildError::UndefinedVariable
            });
        };
        let scope = &self.scopes[id];
        if scope.variable.is_boxed {
            return Ok(());
        }
        let slot = scope.variable.index;
        let stop = scope.stop.unwrap_or(usize::MAX).min(instructions.count());
        let mut children: Vec<(usize, usize)> = scope
            .children
            .iter()
            .map(|child| {
                let child = &self.scopes[*child];
                (child.start, child.stop.unwrap_or(usize::MAX))
            })
            .collect();
        children.sort_unstable();

        let mut children = children.into_iter().peekable();
        let mut index = scope.start;
        while index < stop {
            if let Some(&(child_start, child_stop)) = children.peek() {
                if child_start <= index {
                    children.next();
                    index = index.max(child_stop);
                    continue;
                }
            }
            instructions.switch_to_boxed(slot, index);
            index += 1;
        }

        self.scopes[id].variable.is_boxed = true;
        debug!(slot, "local boxed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Instruction, Value};

    #[test]
    fn test_slots_are_reused() {
        let mut locals = LocalVariables::new();
        let a = locals.define_local("a", 0);
        let b = locals.define_local("b", 0);
        assert_eq!(locals.get(&"b").unwrap().index, 1);
        locals.undefine_local(b, 0);
        let c = locals.define_local("c", 0);
        assert_eq!(locals.get(&"c").unwrap().index, 1);
        locals.undefine_local(c, 0);
        locals.undefine_local(a, 0);
        assert!(locals.get(&"a").is_none());
        assert_eq!(locals.local_count(), 2);
    }

    #[test]
    fn test_shadowing() {
        let mut locals = LocalVariables::new();
        let _outer = locals.define_local("x", 0);
        let inner = locals.define_local("x", 0);
        assert_eq!(locals.get(&"x").unwrap().index, 1);
        locals.undefine_local(inner, 0);
        assert_eq!(locals.get(&"x").unwrap().index, 0);
    }

    #[test]
    fn test_box_rewrites_scope() {
        let mut list = InstructionList::new();
        let mut locals = LocalVariables::new();
        locals.define_local("x", 0);
        let variable = locals.get(&"x").unwrap();
        list.emit_init_local(&variable).unwrap();
        list.emit_load(Value::I32(1)).unwrap();
        list.emit_store_local(&variable).unwrap();
        list.emit_load_local(&variable).unwrap();
        list.emit_pop().unwrap();

        locals.box_variable(&"x", &mut list).unwrap();
        let code = list.instructions();
        assert!(matches!(code[0], Instruction::InitLocalBoxed(0)));
        assert!(matches!(code[2], Instruction::StoreLocalBoxed(0)));
        assert!(matches!(code[3], Instruction::LoadLocalBoxed(0)));
        assert!(locals.get(&"x").unwrap().is_boxed);
    }

    #[test]
    fn test_box_leaves_closed_scope() {
        let mut list = InstructionList::new();
        let mut locals = LocalVariables::new();
        let first = locals.define_local("x", 0);
        list.emit(Instruction::InitLocal(0)).unwrap();
        locals.undefine_local(first, list.count());

        locals.define_local("x", list.count());
        list.emit(Instruction::InitLocal(0)).unwrap();
        locals.box_variable(&"x", &mut list).unwrap();
        assert!(matches!(list.instructions()[0], Instruction::InitLocal(0)));
        assert!(matches!(list.instructions()[1], Instruction::InitLocalBoxed(0)));
    }

    #[test]
    fn test_box_skips_child_scope() {
        let mut list = InstructionList::new();
        let mut locals = LocalVariables::new();
        locals.define_local("x", 0);
        list.emit(Instruction::InitLocal(0)).unwrap();
        let child = locals.define_local("x", list.count());
        list.emit(Instruction::LoadLocal(0)).unwrap();
        list.emit_pop().unwrap();
        locals.undefine_local(child, list.count());
        list.emit(Instruction::LoadLocal(0)).unwrap();
        list.emit_pop().unwrap();

        locals.box_variable(&"x", &mut list).unwrap();
        let code = list.instructions();
        assert!(matches!(code[0], Instruction::InitLocalBoxed(0)));
        assert!(matches!(code[1], Instruction::LoadLocal(0)));
        assert!(matches!(code[3], Instruction::LoadLocalBoxed(0)));
    }

    #[test]
    fn test_box_closure_variable() {
        let mut list = InstructionList::new();
        let mut locals = LocalVariables::new();
        locals.add_closure_variable("y", 0);
        assert_eq!(
            locals.box_variable(&"y", &mut list),
            Err(BuildError::BoxedClosureVariable)
        );
        assert_eq!(
            locals.box_variable(&"z", &mut list),
            Err(BuildError::UndefinedVariable)
        );
        assert_eq!(locals.get(&"y").unwrap().slot(), Slot::Closure(0));
    }
}
