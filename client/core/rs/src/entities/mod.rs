use async_timing_util::unix_timestamp_ms;
use rand::{Rng, distr::Alphanumeric};

pub mod logger;
pub mod repo;
pub mod server;
pub mod task;

/// Mongo ObjectId as hex string.
pub type MongoId = String;

/// Unix timestamp in milliseconds.
pub type I64 = i64;

pub fn pulp_manager_timestamp() -> i64 {
  unix_timestamp_ms() as i64
}

pub fn random_string(length: usize) -> String {
  rand::rng()
    .sample_iter(&Alphanumeric)
    .take(length)
    .map(char::from)
    .collect()
}

/// Implements int-persisted serde for an enum: serialized as its small-int
/// id, deserialized from either the id or the snake_case name. Persisted ids
/// are part of the storage format and must never be renumbered.
macro_rules! int_enum_serde {
  ($name:ident) => {
    impl serde::Serialize for $name {
      fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
      ) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.value())
      }
    }

    impl<'de> serde::Deserialize<'de> for $name {
      fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
      ) -> Result<Self, D::Error> {
        struct V;
        impl serde::de::Visitor<'_> for V {
          type Value = $name;
          fn expecting(
            &self,
            f: &mut std::fmt::Formatter,
          ) -> std::fmt::Result {
            write!(
              f,
              concat!(stringify!($name), " id or name")
            )
          }
          fn visit_i64<E: serde::de::Error>(
            self,
            v: i64,
          ) -> Result<$name, E> {
            i32::try_from(v)
              .ok()
              .and_then($name::from_value)
              .ok_or_else(|| {
                E::custom(format!(
                  concat!("invalid ", stringify!($name), " id: {}"),
                  v
                ))
              })
          }
          fn visit_u64<E: serde::de::Error>(
            self,
            v: u64,
          ) -> Result<$name, E> {
            self.visit_i64(v as i64)
          }
          fn visit_str<E: serde::de::Error>(
            self,
            v: &str,
          ) -> Result<$name, E> {
            v.parse().map_err(|_| {
              E::custom(format!(
                concat!("invalid ", stringify!($name), ": {}"),
                v
              ))
            })
          }
        }
        deserializer.deserialize_any(V)
      }
    }
  };
}

pub(crate) use int_enum_serde;
