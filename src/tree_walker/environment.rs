//! Lexical environments as an explicit linked chain of scopes. The
//! resolver computes, for each variable reference, how many
//! `enclosing` links to walk before looking the name up directly —
//! `get_at`/`assign_at` trust that distance instead of searching.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;

pub type Env = Rc<RefCell<EnvData>>;

pub struct EnvData {
    values: HashMap<String, Value>,
    enclosing: Option<Env>,
}

pub fn new_env(enclosing: Option<Env>) -> Env {
    Rc::new(RefCell::new(EnvData { values: HashMap::new(), enclosing }))
}

impl EnvData {
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        self.enclosing.as_ref().and_then(|e| e.borrow().get(name))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        if self.values.contains_key(name) {
            self.values.insert(name.to_string(), value);
            return true;
        }
        match &self.enclosing {
            Some(e) => e.borrow_mut().assign(name, value),
            None => false,
        }
    }

    fn ancestor(env: &Env, distance: usize) -> Env {
        let mut current = Rc::clone(env);
        for _ in 0..distance {
            let next = current
                .borrow()
                .enclosing
                .clone()
                .expect("resolver-computed distance must stay within the environment chain");
            current = next;
        }
        current
    }
}

pub fn get_at(env: &Env, distance: usize, name: &str) -> Value {
    let target = EnvData::ancestor(env, distance);
    let value = target.borrow().values.get(name).cloned();
    value.unwrap_or_else(|| panic!("resolver resolved '{name}' to a scope that doesn't define it"))
}

pub fn assign_at(env: &Env, distance: usize, name: &str, value: Value) {
    let target = EnvData::ancestor(env, distance);
    target.borrow_mut().values.insert(name.to_string(), value);
}
