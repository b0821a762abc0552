//! Shadow components and changed-tags.
//!
//! A **shadow** stores the last observed value of a payload component so the
//! value-diff pass can tell whether the payload changed since it last looked.
//! A **changed-tag** is a transient marker added when it did.
//!
//! [`Previous<T>`] covers every payload that is `Clone + PartialEq`; custom
//! shadows implement [`Shadow`] directly, for example to compare with a
//! tolerance or to keep only the fields that matter.

use std::fmt;
use std::marker::PhantomData;

use crate::engine::component::Component;

/// Last-observed copy of a payload `T`.
///
/// ## Contract
/// * [`capture`](Shadow::capture) followed by [`matches`](Shadow::matches)
///   against the same value returns `true`.
/// * After [`set`](Shadow::set), `matches` against the same value returns
///   `true`.
pub trait Shadow<T>: Component + Clone {
    /// Creates a shadow holding `value`.
    fn capture(value: &T) -> Self;

    /// Returns `true` if the stored value equals `value`.
    fn matches(&self, value: &T) -> bool;

    /// Overwrites the stored value from `value`.
    fn set(&mut self, value: &T) {
        *self = Self::capture(value);
    }
}

/// Shadow storing a full clone of the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Previous<T>(pub T);

impl<T> Previous<T> {
    /// Stored value.
    #[inline]
    pub fn value(&self) -> &T {
        &self.0
    }
}

impl<T: Component + Clone + PartialEq> Shadow<T> for Previous<T> {
    #[inline]
    fn capture(value: &T) -> Self {
        Self(value.clone())
    }

    #[inline]
    fn matches(&self, value: &T) -> bool {
        self.0 == *value
    }

    #[inline]
    fn set(&mut self, value: &T) {
        self.0.clone_from(value);
    }
}

/// Zero-size changed-tag for payload `T`.
///
/// Only its presence carries meaning.
pub struct Changed<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> Default for Changed<T> {
    fn default() -> Self {
        Self { _payload: PhantomData }
    }
}

impl<T> Clone for Changed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Changed<T> {}

impl<T> PartialEq for Changed<T> {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl<T> Eq for Changed<T> {}

impl<T> fmt::Debug for Changed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Changed<{}>", std::any::type_name::<T>())
    }
}
