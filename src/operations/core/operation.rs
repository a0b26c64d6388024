use futures_util::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use uuid::Uuid;

use super::errors::OperationError;
use crate::entity::{AnyLite, Entity, LifecycleState, Lite, StatefulEntity};

// ============================================================================
// Operation Descriptors
// ============================================================================
//
// An operation is declared once, at start-up, as data: kind, allowed source
// states, target state, optional precondition and a body. The graph engine
// enforces the declaration; bodies only describe the field changes.
//
// Two builders produce descriptors:
// - `Execute`   - in-place transition of an existing (or `allows_new`) entity
// - `Construct` - builds a new entity from nothing, one source or many
//
// ============================================================================

/// Identifier of an operation, unique per entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationKey(&'static str);

impl OperationKey {
    pub const fn new(key: &'static str) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Construct,
    ConstructFrom,
    ConstructFromMany,
    Execute,
}

impl OperationKind {
    pub fn is_construct(&self) -> bool {
        !matches!(self, OperationKind::Execute)
    }
}

// ============================================================================
// Invocation Context & Arguments
// ============================================================================

/// Explicit per-invocation context. Replaces any notion of a global
/// "current user".
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub user: Option<AnyLite>,
    pub correlation_id: Uuid,
}

impl OperationContext {
    pub fn new(user: Option<AnyLite>) -> Self {
        Self {
            user,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Context for unattended work (scheduled tasks, background runs).
    pub fn system() -> Self {
        Self::new(None)
    }

    pub fn as_user<T: Entity>(user: &Lite<T>) -> Self {
        Self::new(Some(user.erase()))
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// The acting user, if it is a `T`.
    pub fn user_as<T: Entity>(&self) -> Option<Lite<T>> {
        self.user.as_ref().and_then(|u| u.downcast::<T>())
    }
}

/// Positional, JSON-encoded arguments passed to operation bodies.
#[derive(Clone, Debug, Default)]
pub struct OperationArgs(Vec<serde_json::Value>);

impl OperationArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn push(mut self, value: serde_json::Value) -> Self {
        self.0.push(value);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes the argument at `index`; `None` when absent.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, OperationError> {
        self.0
            .get(index)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    OperationError::InvalidArguments(format!("argument {index}: {e}"))
                })
            })
            .transpose()
    }
}

/// What a construct operation builds from.
#[derive(Clone, Debug)]
pub enum ConstructSource {
    None,
    One(AnyLite),
    Many(Vec<AnyLite>),
}

impl ConstructSource {
    pub fn one<T: Entity>(source: &Lite<T>) -> Self {
        ConstructSource::One(source.erase())
    }

    pub fn many<T: Entity>(sources: &[Lite<T>]) -> Self {
        ConstructSource::Many(sources.iter().map(Lite::erase).collect())
    }

    fn into_one<T: Entity>(self, key: OperationKey) -> Result<Lite<T>, OperationError> {
        match self {
            ConstructSource::One(source) => source.downcast::<T>().ok_or_else(|| {
                OperationError::InvalidArguments(format!(
                    "{key} constructs from a {}, got {}",
                    T::TYPE_NAME,
                    source.entity_type
                ))
            }),
            other => Err(OperationError::InvalidArguments(format!(
                "{key} expects exactly one {}, got {other:?}",
                T::TYPE_NAME
            ))),
        }
    }

    fn into_many<T: Entity>(self, key: OperationKey) -> Result<Vec<Lite<T>>, OperationError> {
        let ConstructSource::Many(sources) = self else {
            return Err(OperationError::InvalidArguments(format!(
                "{key} expects a list of {}",
                T::TYPE_NAME
            )));
        };

        sources
            .iter()
            .map(|source| {
                source.downcast::<T>().ok_or_else(|| {
                    OperationError::InvalidArguments(format!(
                        "{key} constructs from {}, got {}",
                        T::TYPE_NAME,
                        source.entity_type
                    ))
                })
            })
            .collect()
    }
}

// ============================================================================
// Stored Descriptor
// ============================================================================

pub(crate) type Precondition<E> = Box<dyn Fn(&E) -> Option<String> + Send + Sync>;

pub(crate) type Effect<E> =
    Box<dyn Fn(&mut E, &OperationContext, &OperationArgs) -> Result<(), OperationError> + Send + Sync>;

pub(crate) type Constructor<E> = Box<
    dyn Fn(ConstructSource, OperationContext, OperationArgs) -> BoxFuture<'static, Result<E, OperationError>>
        + Send
        + Sync,
>;

pub(crate) enum Body<E> {
    Construct(Constructor<E>),
    Execute(Effect<E>),
}

pub struct Operation<E: StatefulEntity> {
    pub(crate) key: OperationKey,
    pub(crate) kind: OperationKind,
    pub(crate) from_states: HashSet<E::State>,
    pub(crate) to_state: E::State,
    pub(crate) allows_new: bool,
    pub(crate) precondition: Option<Precondition<E>>,
    pub(crate) body: Body<E>,
}

impl<E: StatefulEntity> Operation<E> {
    pub fn key(&self) -> OperationKey {
        self.key
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn from_states(&self) -> &HashSet<E::State> {
        &self.from_states
    }

    pub fn to_state(&self) -> E::State {
        self.to_state
    }

    pub fn allows_new(&self) -> bool {
        self.allows_new
    }

    /// Whether this operation can start from `state`.
    pub fn leaves(&self, state: E::State) -> bool {
        self.kind == OperationKind::Execute
            && (self.from_states.is_empty() || self.from_states.contains(&state))
    }

    /// Kind, new/existing, state membership and precondition, in that order.
    pub(crate) fn check(&self, entity: &E) -> Result<(), OperationError> {
        if self.kind.is_construct() {
            return Err(OperationError::IllegalTransition(format!(
                "{} constructs a new {} and cannot be executed on one",
                self.key,
                E::TYPE_NAME
            )));
        }

        if entity.is_new() && !self.allows_new {
            return Err(OperationError::IllegalTransition(format!(
                "{} cannot be executed on a new {}",
                self.key,
                E::TYPE_NAME
            )));
        }

        let state = entity.state();
        if !self.from_states.is_empty() && !self.from_states.contains(&state) {
            return Err(OperationError::IllegalTransition(format!(
                "{} is {:?}, {} requires {}",
                E::TYPE_NAME,
                state,
                self.key,
                self.describe_from_states()
            )));
        }

        self.check_precondition(entity)
    }

    pub(crate) fn check_precondition(&self, entity: &E) -> Result<(), OperationError> {
        match self.precondition.as_ref().and_then(|p| p(entity)) {
            Some(reason) => Err(OperationError::PreconditionFailed(reason)),
            None => Ok(()),
        }
    }

    /// A body that leaves the entity anywhere but `to_state` is a broken
    /// declaration, never a runtime condition.
    pub(crate) fn assert_end_state(&self, entity: &E) -> Result<(), OperationError> {
        let state = entity.state();
        if state != self.to_state {
            return Err(OperationError::Configuration(format!(
                "{} left {} in {:?}, declared {:?}",
                self.key,
                E::TYPE_NAME,
                state,
                self.to_state
            )));
        }
        Ok(())
    }

    fn describe_from_states(&self) -> String {
        <E::State as LifecycleState>::ALL
            .iter()
            .filter(|s| self.from_states.contains(s))
            .map(|s| format!("{s:?}"))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Anything that can be registered on a graph.
pub trait IntoOperation<E: StatefulEntity> {
    fn into_operation(self) -> Result<Operation<E>, OperationError>;
}

// ============================================================================
// Execute Builder
// ============================================================================

pub struct Execute<E: StatefulEntity> {
    key: OperationKey,
    from_states: HashSet<E::State>,
    to_state: Option<E::State>,
    allows_new: bool,
    precondition: Option<Precondition<E>>,
    effect: Option<Effect<E>>,
}

impl<E: StatefulEntity> Execute<E> {
    pub fn new(key: OperationKey) -> Self {
        Self {
            key,
            from_states: HashSet::new(),
            to_state: None,
            allows_new: false,
            precondition: None,
            effect: None,
        }
    }

    pub fn from_states(mut self, states: impl IntoIterator<Item = E::State>) -> Self {
        self.from_states.extend(states);
        self
    }

    pub fn to_state(mut self, state: E::State) -> Self {
        self.to_state = Some(state);
        self
    }

    pub fn allows_new(mut self) -> Self {
        self.allows_new = true;
        self
    }

    /// Returns the reason the operation is not allowed, or `None`.
    pub fn can_execute(mut self, precondition: impl Fn(&E) -> Option<String> + Send + Sync + 'static) -> Self {
        self.precondition = Some(Box::new(precondition));
        self
    }

    pub fn effect(
        mut self,
        effect: impl Fn(&mut E, &OperationContext, &OperationArgs) -> Result<(), OperationError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }
}

impl<E: StatefulEntity> IntoOperation<E> for Execute<E> {
    fn into_operation(self) -> Result<Operation<E>, OperationError> {
        let to_state = self.to_state.ok_or_else(|| {
            OperationError::Configuration(format!("{} has no target state", self.key))
        })?;
        let effect = self
            .effect
            .ok_or_else(|| OperationError::Configuration(format!("{} has no effect", self.key)))?;

        Ok(Operation {
            key: self.key,
            kind: OperationKind::Execute,
            from_states: self.from_states,
            to_state,
            allows_new: self.allows_new,
            precondition: self.precondition,
            body: Body::Execute(effect),
        })
    }
}

// ============================================================================
// Construct Builder
// ============================================================================

pub struct Construct<E: StatefulEntity> {
    key: OperationKey,
    kind: OperationKind,
    to_state: Option<E::State>,
    precondition: Option<Precondition<E>>,
    constructor: Option<Constructor<E>>,
}

impl<E: StatefulEntity> Construct<E> {
    pub fn new(key: OperationKey) -> Self {
        Self {
            key,
            kind: OperationKind::Construct,
            to_state: None,
            precondition: None,
            constructor: None,
        }
    }

    pub fn to_state(mut self, state: E::State) -> Self {
        self.to_state = Some(state);
        self
    }

    /// Checked against the freshly built entity.
    pub fn can_execute(mut self, precondition: impl Fn(&E) -> Option<String> + Send + Sync + 'static) -> Self {
        self.precondition = Some(Box::new(precondition));
        self
    }

    /// Builds from nothing.
    pub fn construct<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationContext, OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<E, OperationError>> + Send + 'static,
    {
        self.kind = OperationKind::Construct;
        self.constructor = Some(Box::new(
            move |_source: ConstructSource, ctx: OperationContext, args: OperationArgs| {
                f(ctx, args).boxed()
            },
        ));
        self
    }

    /// Builds from one `T`.
    pub fn construct_from<T, F, Fut>(mut self, f: F) -> Self
    where
        T: Entity,
        F: Fn(Lite<T>, OperationContext, OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<E, OperationError>> + Send + 'static,
    {
        let key = self.key;
        self.kind = OperationKind::ConstructFrom;
        self.constructor = Some(Box::new(move |source: ConstructSource, ctx: OperationContext, args: OperationArgs| {
            match source.into_one::<T>(key) {
                Ok(source) => f(source, ctx, args).boxed(),
                Err(e) => future::ready(Err(e)).boxed(),
            }
        }));
        self
    }

    /// Builds from many `T`.
    pub fn construct_from_many<T, F, Fut>(mut self, f: F) -> Self
    where
        T: Entity,
        F: Fn(Vec<Lite<T>>, OperationContext, OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<E, OperationError>> + Send + 'static,
    {
        let key = self.key;
        self.kind = OperationKind::ConstructFromMany;
        self.constructor = Some(Box::new(move |source: ConstructSource, ctx: OperationContext, args: OperationArgs| {
            match source.into_many::<T>(key) {
                Ok(sources) => f(sources, ctx, args).boxed(),
                Err(e) => future::ready(Err(e)).boxed(),
            }
        }));
        self
    }
}

impl<E: StatefulEntity> IntoOperation<E> for Construct<E> {
    fn into_operation(self) -> Result<Operation<E>, OperationError> {
        let to_state = self.to_state.ok_or_else(|| {
            OperationError::Configuration(format!("{} has no target state", self.key))
        })?;
        let constructor = self.constructor.ok_or_else(|| {
            OperationError::Configuration(format!("{} has no constructor", self.key))
        })?;

        Ok(Operation {
            key: self.key,
            kind: self.kind,
            from_states: HashSet::new(),
            to_state,
            allows_new: true,
            precondition: self.precondition,
            body: Body::Construct(constructor),
        })
    }
}
