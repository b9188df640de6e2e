use serde::{Deserialize, Serialize};

/// Declares an opaque, type-safe identifier over an unsigned integer.
///
/// Each entity gets its own id type so a `ProductId` can never be passed
/// where an `OrderId` is expected.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates an identifier from its raw value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Returns the value as a signed 64-bit integer for SQL binding.
            ///
            /// Values above `i64::MAX` saturate; no stored row can carry them.
            pub fn as_i64(&self) -> i64 {
                i64::try_from(self.0).unwrap_or(i64::MAX)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = std::num::TryFromIntError;

            fn try_from(raw: i64) -> Result<Self, Self::Error> {
                u64::try_from(raw).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifier of a catalog product.
    ProductId
);
define_id!(
    /// Identifier of a product category.
    CategoryId
);
define_id!(
    /// Identifier of a registered user.
    UserId
);
define_id!(
    /// Identifier of a user's cart.
    CartId
);
define_id!(
    /// Identifier of a line in a cart.
    CartItemId
);
define_id!(
    /// Identifier of a placed order.
    OrderId
);
define_id!(
    /// Identifier of a payment.
    PaymentId
);
