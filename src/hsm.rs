//! Hierarchical state machine engine.
//!
//! States form a tree through [`StateTree::parent`]. An event is offered to the
//! current leaf first; a handler that returns [`Response::Unhandled`] defers
//! to its parent, and the engine keeps walking outward until some state claims
//! the event or the implicit top is reached, where it is dropped.
//!
//! ```text
//!  dispatch(event)
//!      │
//!      ▼
//!  leaf ──Unhandled──▶ parent ──Unhandled──▶ ... ──▶ top (discard)
//!      │                  │
//!   Handled          Transition(target)
//!                         │
//!                         ▼
//!      exit leaf .. below LCA, enter below LCA .. target,
//!      then follow init targets down to the new leaf
//! ```
//!
//! Every walk is iterative and bounded by [`MAX_STATE_DEPTH`], so stack usage
//! does not depend on the shape of the tree.

use core::fmt::{self, Debug};
use heapless::Vec;
use thiserror::Error;
use tracing::{debug, trace};

/// Deepest nesting supported below the implicit top.
pub const MAX_STATE_DEPTH: usize = 8;
/// Longest chain of compound initial transitions followed after one entry.
pub const MAX_INIT_CHAIN: usize = 8;

pub type StatePath<S> = Vec<S, MAX_STATE_DEPTH>;

/// What a state handler does with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<S> {
    Handled,
    Unhandled,
    Transition(S),
}

/// Static description of a state tree and its behavior.
///
/// Handlers receive the shared context by `&mut` and never see the engine,
/// so a handler cannot dispatch another event while a transition is running.
pub trait StateTree {
    type State: Copy + Eq + Debug;
    type Context;
    type Event: Debug;

    /// State entered by [`Hsm::start`].
    fn initial() -> Self::State;

    /// Containing state, or `None` for direct children of the top.
    fn parent(state: Self::State) -> Option<Self::State>;

    fn on_entry(_state: Self::State, _ctx: &mut Self::Context) {}

    fn on_exit(_state: Self::State, _ctx: &mut Self::Context) {}

    /// Compound initial transition taken right after `state` is entered.
    fn on_init(_state: Self::State, _ctx: &mut Self::Context) -> Option<Self::State> {
        None
    }

    fn on_event(
        state: Self::State,
        ctx: &mut Self::Context,
        event: &Self::Event,
    ) -> Response<Self::State>;
}

/// Contract violations. None of these are recoverable: the caller is expected
/// to halt the machine and rebuild it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HsmError {
    #[error("dispatch before the machine was started")]
    NotStarted,
    #[error("state nesting exceeds the supported depth (cycle in parent links?)")]
    DepthExceeded,
    #[error("init chain exceeds the supported number of hops")]
    InitChainTooLong,
    #[error("init target is not a descendant of the state that was entered")]
    InvalidInitTarget,
}

/// Exit/entry bookkeeping for one completed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S> {
    pub source: S,
    pub target: S,
    pub exited: StatePath<S>,
    pub entered: StatePath<S>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<S> {
    /// Consumed by `by` without a state change.
    Handled { by: S },
    /// No state in the active chain claimed the event.
    Ignored,
    Transitioned(Transition<S>),
}

impl<S> Outcome<S> {
    pub fn transition(&self) -> Option<&Transition<S>> {
        match self {
            Outcome::Transitioned(transition) => Some(transition),
            _ => None,
        }
    }
}

/// The engine proper: just the current leaf. Behavior lives in `T`.
pub struct Hsm<T: StateTree> {
    current: Option<T::State>,
}

impl<T: StateTree> fmt::Debug for Hsm<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hsm").field("current", &self.current).finish()
    }
}

impl<T: StateTree> Hsm<T> {
    pub const fn new() -> Self {
        Self { current: None }
    }

    pub fn current(&self) -> Option<T::State> {
        self.current
    }

    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    /// True when `state` is the current leaf or one of its ancestors.
    pub fn is_in(&self, state: T::State) -> bool {
        let Some(leaf) = self.current else {
            return false;
        };
        ancestry::<T>(leaf).is_ok_and(|path| path.contains(&state))
    }

    /// Enter the initial state from the top, following its init chain.
    pub fn start(&mut self, ctx: &mut T::Context) -> Result<StatePath<T::State>, HsmError> {
        let target = T::initial();
        let mut entered = StatePath::new();
        enter_down_to::<T>(None, target, ctx, &mut entered)?;
        self.current = Some(target);
        self.follow_init(target, ctx, &mut entered)?;
        debug!(?entered, "state machine started");
        Ok(entered)
    }

    /// Offer `event` to the current leaf and its ancestors.
    pub fn dispatch(
        &mut self,
        ctx: &mut T::Context,
        event: &T::Event,
    ) -> Result<Outcome<T::State>, HsmError> {
        let leaf = self.current.ok_or(HsmError::NotStarted)?;

        let mut candidate = Some(leaf);
        let mut depth = 0;
        while let Some(state) = candidate {
            depth += 1;
            if depth > MAX_STATE_DEPTH {
                return Err(HsmError::DepthExceeded);
            }

            match T::on_event(state, ctx, event) {
                Response::Handled => return Ok(Outcome::Handled { by: state }),
                Response::Unhandled => candidate = T::parent(state),
                Response::Transition(target) => {
                    return self
                        .transition(leaf, target, ctx)
                        .map(Outcome::Transitioned);
                }
            }
        }

        trace!(?event, ?leaf, "event reached the top unhandled");
        Ok(Outcome::Ignored)
    }

    fn transition(
        &mut self,
        source: T::State,
        target: T::State,
        ctx: &mut T::Context,
    ) -> Result<Transition<T::State>, HsmError> {
        let source_path = ancestry::<T>(source)?;
        let target_path = ancestry::<T>(target)?;

        // Nearest proper ancestor of the target that also contains the source.
        // Skipping the target itself makes self- and ancestor-transitions
        // exit and re-enter the target.
        let lca = target_path
            .iter()
            .skip(1)
            .find(|&&state| source_path.contains(&state))
            .copied();

        let mut exited = StatePath::new();
        for &state in &source_path {
            if Some(state) == lca {
                break;
            }
            T::on_exit(state, ctx);
            exited.push(state).map_err(|_| HsmError::DepthExceeded)?;
        }

        let mut entered = StatePath::new();
        enter_down_to::<T>(lca, target, ctx, &mut entered)?;
        self.current = Some(target);

        let leaf = self.follow_init(target, ctx, &mut entered)?;

        Ok(Transition {
            source,
            target: leaf,
            exited,
            entered,
        })
    }

    fn follow_init(
        &mut self,
        mut state: T::State,
        ctx: &mut T::Context,
        entered: &mut StatePath<T::State>,
    ) -> Result<T::State, HsmError> {
        let mut hops = 0;
        while let Some(next) = T::on_init(state, ctx) {
            hops += 1;
            if hops > MAX_INIT_CHAIN {
                return Err(HsmError::InitChainTooLong);
            }
            if next == state || !ancestry::<T>(next)?.contains(&state) {
                return Err(HsmError::InvalidInitTarget);
            }
            enter_down_to::<T>(Some(state), next, ctx, entered)?;
            self.current = Some(next);
            state = next;
        }
        Ok(state)
    }
}

impl<T: StateTree> Default for Hsm<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `state` followed by each of its ancestors, innermost first.
pub fn ancestry<T: StateTree>(state: T::State) -> Result<StatePath<T::State>, HsmError> {
    let mut path = StatePath::new();
    let mut cursor = Some(state);
    while let Some(current) = cursor {
        path.push(current).map_err(|_| HsmError::DepthExceeded)?;
        cursor = T::parent(current);
    }
    Ok(path)
}

/// Check that every state resolves to the top within [`MAX_STATE_DEPTH`].
pub fn verify_tree<T: StateTree>(states: &[T::State]) -> Result<(), HsmError> {
    for &state in states {
        ancestry::<T>(state)?;
    }
    Ok(())
}

/// Run entry actions from just below `from` down to `target`, outermost first.
fn enter_down_to<T: StateTree>(
    from: Option<T::State>,
    target: T::State,
    ctx: &mut T::Context,
    entered: &mut StatePath<T::State>,
) -> Result<(), HsmError> {
    let path = ancestry::<T>(target)?;
    let stop = match from {
        Some(from) => path
            .iter()
            .position(|&state| state == from)
            .ok_or(HsmError::InvalidInitTarget)?,
        None => path.len(),
    };

    for &state in path[..stop].iter().rev() {
        T::on_entry(state, ctx);
        entered.push(state).map_err(|_| HsmError::DepthExceeded)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A small tree exercising the engine independently of the mode policy:
    //
    //   A
    //   ├── B
    //   │   └── D
    //   └── C
    //       └── E  (init from C)
    //   F          (second child of the top)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum S {
        A,
        B,
        C,
        D,
        E,
        F,
        Loop1,
        Loop2,
    }

    #[derive(Debug)]
    enum Ev {
        Go(S),
        Claim,
        Nothing,
    }

    #[derive(Default)]
    struct Log {
        actions: std::vec::Vec<std::string::String>,
    }

    struct Tree;

    impl StateTree for Tree {
        type State = S;
        type Context = Log;
        type Event = Ev;

        fn initial() -> S {
            S::A
        }

        fn parent(state: S) -> Option<S> {
            match state {
                S::A | S::F => None,
                S::B | S::C => Some(S::A),
                S::D => Some(S::B),
                S::E => Some(S::C),
                S::Loop1 => Some(S::Loop2),
                S::Loop2 => Some(S::Loop1),
            }
        }

        fn on_entry(state: S, ctx: &mut Log) {
            ctx.actions.push(format!("enter {state:?}"));
        }

        fn on_exit(state: S, ctx: &mut Log) {
            ctx.actions.push(format!("exit {state:?}"));
        }

        fn on_init(state: S, _ctx: &mut Log) -> Option<S> {
            match state {
                S::A => Some(S::B),
                S::B => Some(S::D),
                S::C => Some(S::E),
                _ => None,
            }
        }

        fn on_event(state: S, _ctx: &mut Log, event: &Ev) -> Response<S> {
            match (state, event) {
                (S::A, Ev::Go(target)) => Response::Transition(*target),
                (S::B, Ev::Claim) => Response::Handled,
                _ => Response::Unhandled,
            }
        }
    }

    fn started() -> (Hsm<Tree>, Log) {
        let mut hsm = Hsm::<Tree>::new();
        let mut log = Log::default();
        hsm.start(&mut log).unwrap();
        log.actions.clear();
        (hsm, log)
    }

    #[test]
    fn test_start_follows_init_chain() {
        let mut hsm = Hsm::<Tree>::new();
        let mut log = Log::default();
        let entered = hsm.start(&mut log).unwrap();

        assert_eq!(entered.as_slice(), &[S::A, S::B, S::D]);
        assert_eq!(hsm.current(), Some(S::D));
        assert_eq!(log.actions, ["enter A", "enter B", "enter D"]);
    }

    #[test]
    fn test_dispatch_before_start_is_fatal() {
        let mut hsm = Hsm::<Tree>::new();
        let mut log = Log::default();
        assert_eq!(hsm.dispatch(&mut log, &Ev::Claim), Err(HsmError::NotStarted));
    }

    #[test]
    fn test_parent_handles_unclaimed_event() {
        let (mut hsm, mut log) = started();
        let outcome = hsm.dispatch(&mut log, &Ev::Claim).unwrap();

        assert_eq!(outcome, Outcome::Handled { by: S::B });
        assert_eq!(hsm.current(), Some(S::D));
        assert!(log.actions.is_empty());
    }

    #[test]
    fn test_unclaimed_event_is_ignored_at_top() {
        let (mut hsm, mut log) = started();
        let outcome = hsm.dispatch(&mut log, &Ev::Nothing).unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(hsm.current(), Some(S::D));
        assert!(log.actions.is_empty());
    }

    #[test]
    fn test_cross_branch_transition_exits_to_lca() {
        let (mut hsm, mut log) = started();
        let outcome = hsm.dispatch(&mut log, &Ev::Go(S::C)).unwrap();
        let transition = outcome.transition().unwrap();

        assert_eq!(transition.source, S::D);
        assert_eq!(transition.target, S::E);
        assert_eq!(transition.exited.as_slice(), &[S::D, S::B]);
        assert_eq!(transition.entered.as_slice(), &[S::C, S::E]);
        assert_eq!(log.actions, ["exit D", "exit B", "enter C", "enter E"]);
    }

    #[test]
    fn test_transition_to_ancestor_reenters_it() {
        let (mut hsm, mut log) = started();
        let outcome = hsm.dispatch(&mut log, &Ev::Go(S::B)).unwrap();
        let transition = outcome.transition().unwrap();

        assert_eq!(transition.exited.as_slice(), &[S::D, S::B]);
        assert_eq!(transition.entered.as_slice(), &[S::B, S::D]);
        assert_eq!(hsm.current(), Some(S::D));
    }

    #[test]
    fn test_self_transition_exits_and_reenters() {
        let (mut hsm, mut log) = started();
        let outcome = hsm.dispatch(&mut log, &Ev::Go(S::D)).unwrap();
        let transition = outcome.transition().unwrap();

        assert_eq!(transition.exited.as_slice(), &[S::D]);
        assert_eq!(transition.entered.as_slice(), &[S::D]);
    }

    #[test]
    fn test_transition_out_of_the_tree_exits_everything() {
        let (mut hsm, mut log) = started();
        let outcome = hsm.dispatch(&mut log, &Ev::Go(S::F)).unwrap();
        let transition = outcome.transition().unwrap();

        assert_eq!(transition.exited.as_slice(), &[S::D, S::B, S::A]);
        assert_eq!(transition.entered.as_slice(), &[S::F]);
        assert!(hsm.is_in(S::F));
        assert!(!hsm.is_in(S::A));
    }

    #[test]
    fn test_is_in_checks_ancestors() {
        let (hsm, _log) = started();
        assert!(hsm.is_in(S::D));
        assert!(hsm.is_in(S::B));
        assert!(hsm.is_in(S::A));
        assert!(!hsm.is_in(S::C));
    }

    #[test]
    fn test_verify_tree_detects_cycles() {
        assert!(verify_tree::<Tree>(&[S::A, S::B, S::C, S::D, S::E, S::F]).is_ok());
        assert_eq!(
            verify_tree::<Tree>(&[S::Loop1]),
            Err(HsmError::DepthExceeded)
        );
    }
}
