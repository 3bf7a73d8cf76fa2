use std::any::Any;

/// A value that knows how to compare itself against an arbitrary other value.
///
/// Implement this for value types whose equality is not (or should not be) their `PartialEq`,
/// then construct the property with [`Property::comparable`](crate::Property::comparable).
/// Implementations must return `false` when `other` is not of the expected type.
///
/// ```rust
/// use ankurah_property::Comparable;
/// use std::any::Any;
///
/// struct Version { major: u32, build: u64 }
///
/// impl Comparable for Version {
///     // builds of the same major version are the same version
///     fn equals(&self, other: &dyn Any) -> bool { other.downcast_ref::<Self>().is_some_and(|o| o.major == self.major) }
/// }
///
/// assert!(Version { major: 1, build: 10 }.equals(&Version { major: 1, build: 11 }));
/// assert!(!Version { major: 1, build: 10 }.equals(&1u32));
/// ```
pub trait Comparable {
    fn equals(&self, other: &dyn Any) -> bool;
}

/// The equality strategy of a property, chosen when the property is constructed
pub(crate) enum Comparator<T> {
    /// The value type's own `PartialEq`
    Native(fn(&T, &T) -> bool),
    /// Delegates to the value type's `Comparable` implementation
    Custom(fn(&T, &dyn Any) -> bool),
}

impl<T: 'static> Comparator<T> {
    pub fn native() -> Self
    where T: PartialEq {
        Comparator::Native(<T as PartialEq>::eq)
    }

    pub fn custom() -> Self
    where T: Comparable {
        Comparator::Custom(<T as Comparable>::equals)
    }

    /// Compares `current` (the receiver) against `other`. A mismatched type is never equal.
    pub fn equals(&self, current: &T, other: &dyn Any) -> bool {
        match self {
            Comparator::Native(eq) => other.downcast_ref::<T>().is_some_and(|other| eq(current, other)),
            Comparator::Custom(equals) => equals(current, other),
        }
    }
}

impl<T> Clone for Comparator<T> {
    fn clone(&self) -> Self { *self }
}
impl<T> Copy for Comparator<T> {}

impl<T> std::fmt::Debug for Comparator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Native(_) => write!(f, "Native"),
            Comparator::Custom(_) => write!(f, "Custom"),
        }
    }
}
