//! Hierarchical state machine engine.
//!
//! States as data, not deep inheritance: each state is a small integer
//! index into a flat table; the table maps `state -> (parent, entry,
//! exit, initial, handlers)`. Dispatch is a single upward walk with at
//! most one hash-map lookup per ancestor, no virtual dispatch.

use rustc_hash::FxHashMap;

/// States are identified by a small dense index into `Hsm::states`.
pub type StateId = u32;

/// The implicit root of the tree: it has no parent and is never itself
/// entered or exited.
pub const ROOT: StateId = 0;

/// Event names are short interned symbols, the same convention as
/// `PropertyKey`.
pub type EventTag = &'static str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    NotHandled,
}

/// Handed to a handler so it can request a transition without the engine
/// exposing `&mut Hsm` re-entrantly: a handler must not recursively
/// invoke `dispatch` on the same instance.
pub struct Ctx<'a, C> {
    pub user: &'a mut C,
    pending: &'a mut Option<StateId>,
}

impl<'a, C> Ctx<'a, C> {
    /// Record a transition to `target`. This is resolved by
    /// the engine once the current handler returns: exits run from the
    /// current state up to (excluding) the LCA, entries run from the LCA
    /// (excluding) down to `target`, then `target`'s `on_initial` runs if
    /// it has one.
    pub fn transition(&mut self, target: StateId) {
        *self.pending = Some(target);
    }
}

pub type EntryExitFn<C> = fn(&mut C);
pub type InitialFn<C> = fn(&mut Ctx<C>);
pub type HandlerFn<C, E> = fn(&mut Ctx<C>, &E) -> Outcome;

pub struct StateNode<C, E> {
    pub parent: Option<StateId>,
    pub on_entry: Option<EntryExitFn<C>>,
    pub on_exit: Option<EntryExitFn<C>>,
    pub on_initial: Option<InitialFn<C>>,
    pub handlers: FxHashMap<EventTag, HandlerFn<C, E>>,
}

impl<C, E> StateNode<C, E> {
    pub fn new(parent: Option<StateId>) -> Self {
        Self {
            parent,
            on_entry: None,
            on_exit: None,
            on_initial: None,
            handlers: FxHashMap::default(),
        }
    }

    pub fn with_entry(mut self, f: EntryExitFn<C>) -> Self {
        self.on_entry = Some(f);
        self
    }

    pub fn with_exit(mut self, f: EntryExitFn<C>) -> Self {
        self.on_exit = Some(f);
        self
    }

    pub fn with_initial(mut self, f: InitialFn<C>) -> Self {
        self.on_initial = Some(f);
        self
    }

    pub fn on(mut self, tag: EventTag, handler: HandlerFn<C, E>) -> Self {
        self.handlers.insert(tag, handler);
        self
    }
}

/// The HSM instance (this module). Generic over the user context
/// `C` (the agent's own data the handlers mutate) and the event payload
/// type `E` dispatched through it.
pub struct Hsm<C, E> {
    states: Vec<StateNode<C, E>>,
    current: StateId,
}

impl<C, E> Hsm<C, E> {
    /// `states[ROOT as usize]` must exist and have `parent == None`;
    /// every other entry must have `Some(parent)` naming an already
    /// lower-indexed state, so every state declares exactly one parent.
    pub fn new(states: Vec<StateNode<C, E>>) -> Self {
        debug_assert!(!states.is_empty());
        debug_assert!(states[ROOT as usize].parent.is_none());
        Self {
            states,
            current: ROOT,
        }
    }

    pub fn current(&self) -> StateId {
        self.current
    }

    /// True if `state` is an ancestor of (or equal to) `current`.
    pub fn is_in(&self, state: StateId) -> bool {
        let mut s = self.current;
        loop {
            if s == state {
                return true;
            }
            match self.states[s as usize].parent {
                Some(p) => s = p,
                None => return false,
            }
        }
    }

    /// Bring the machine from the (entry-less) implicit root into
    /// `top`'s subtree, running `top`'s `on_entry` and resolving any
    /// `on_initial` chain beneath it. Call once before the first
    /// dispatch (e.g. `Top.on_entry`, `Top.on_initial -> Ready`,
    /// `Ready.on_initial -> Stopped`).
    pub fn start(&mut self, user: &mut C, top: StateId) {
        self.run_entry_chain(user, ROOT, top);
        self.current = top;
        self.resolve_initial(user, top);
    }

    /// Walk from `self.current` up the ancestor chain; the first state
    /// whose handler for `tag` returns `Outcome::Handled` (or requests a
    /// transition) consumes the event.
    pub fn dispatch(&mut self, user: &mut C, tag: EventTag, event: &E) -> Outcome {
        let mut state = self.current;
        loop {
            if let Some(handler) = self.states[state as usize].handlers.get(tag).copied() {
                let mut pending = None;
                let outcome = {
                    let mut ctx = Ctx {
                        user,
                        pending: &mut pending,
                    };
                    handler(&mut ctx, event)
                };
                if let Some(target) = pending {
                    self.transition_to(user, target);
                    return Outcome::Handled;
                }
                if outcome == Outcome::Handled {
                    return Outcome::Handled;
                }
            }
            match self.states[state as usize].parent {
                Some(parent) => state = parent,
                None => return Outcome::NotHandled,
            }
        }
    }

    fn transition_to(&mut self, user: &mut C, target: StateId) {
        let lca = self.lowest_common_ancestor(self.current, target);
        self.run_exit_chain(user, self.current, lca);
        self.run_entry_chain(user, lca, target);
        self.current = target;
        self.resolve_initial(user, target);
    }

    /// After entering `state`, run its `on_initial` (if any); if that
    /// requests a transition to a substate, enter down to it and recurse:
    /// if that substate is itself composite its `on_initial` may request
    /// a further transition, down to as many levels as declared.
    fn resolve_initial(&mut self, user: &mut C, state: StateId) {
        let Some(initial) = self.states[state as usize].on_initial else {
            return;
        };
        let mut pending = None;
        {
            let mut ctx = Ctx {
                user,
                pending: &mut pending,
            };
            initial(&mut ctx);
        }
        if let Some(child) = pending {
            self.run_entry_chain(user, state, child);
            self.current = child;
            self.resolve_initial(user, child);
        }
    }

    /// Run `on_exit` from `from` up to (excluding) `lca`, leaf-first.
    fn run_exit_chain(&mut self, user: &mut C, from: StateId, lca: StateId) {
        let mut s = from;
        while s != lca {
            if let Some(exit) = self.states[s as usize].on_exit {
                exit(user);
            }
            s = self.states[s as usize]
                .parent
                .expect("exit chain reached root before reaching the LCA");
        }
    }

    /// Run `on_entry` from `to` up to (excluding) `from`, then invoke in
    /// root-to-leaf order.
    fn run_entry_chain(&mut self, user: &mut C, from: StateId, to: StateId) {
        let mut path = Vec::new();
        let mut s = to;
        while s != from {
            path.push(s);
            s = self.states[s as usize]
                .parent
                .expect("entry chain reached root before reaching the start state");
        }
        for state in path.into_iter().rev() {
            if let Some(entry) = self.states[state as usize].on_entry {
                entry(user);
            }
        }
    }

    fn ancestors(&self, mut state: StateId) -> Vec<StateId> {
        let mut chain = vec![state];
        while let Some(parent) = self.states[state as usize].parent {
            chain.push(parent);
            state = parent;
        }
        chain
    }

    fn lowest_common_ancestor(&self, a: StateId, b: StateId) -> StateId {
        let ancestors_a = self.ancestors(a);
        let ancestors_b = self.ancestors(b);
        for candidate in ancestors_a {
            if ancestors_b.contains(&candidate) {
                return candidate;
            }
        }
        ROOT
    }
}
