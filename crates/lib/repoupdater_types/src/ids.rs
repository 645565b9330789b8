use derive_more::{Display, FromStr};
use serde::Serialize;

macro_rules! decl_id {
    ($name:ident, $inner:ty) => {
        #[derive(
            Debug, Clone, Copy, Display, PartialEq, Eq, PartialOrd, Ord, Hash, FromStr, Serialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// The sentinel meaning "not yet persisted" (spec.md §3: `id == 0`).
            pub const UNPERSISTED: $name = $name(0);

            pub fn is_unpersisted(&self) -> bool {
                *self == Self::UNPERSISTED
            }
        }
    };
}

decl_id!(ExternalServiceId, i32);
decl_id!(RepoId, i32);
