//! Copy-in/copy-out between guest values and `serde_json::Value`.
//!
//! Nothing else crosses the boundary: capability arguments, capability
//! results, credentials and the entry point's return value all pass through
//! here and come out as fresh, detached values.

use rquickjs::{Ctx, IntoJs, Type, Value, function::This, object::Filter};
use serde::{
    Serialize,
    de::{DeserializeSeed, Visitor},
    ser::{SerializeMap, SerializeSeq},
};

const MAX_DEPTH: usize = 128;
// 2^53 - 1
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Deep-copy a guest value out of the context.
///
/// Follows `JSON.stringify` for `undefined` and `toJSON`, but rejects values
/// it would silently drop or throw on (functions, symbols, bigints, pending
/// promises) so a result never loses data without an error.
pub fn to_json(value: Value<'_>) -> Result<serde_json::Value, String> {
    serde_json::to_value(GuestValue(value, MAX_DEPTH)).map_err(|e| e.to_string())
}

/// Build a fresh guest value from JSON.
pub fn from_json<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> Result<Value<'js>, String> {
    GuestSeed(ctx.clone())
        .deserialize(value)
        .map_err(|e| e.to_string())
}

struct GuestValue<'js>(Value<'js>, usize);

impl<'js> GuestValue<'js> {
    const fn child(&self, val: Value<'js>) -> Self {
        Self(val, self.1 - 1)
    }
}

impl Serialize for GuestValue<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error;

        if self.1 == 0 {
            return Err(S::Error::custom(
                "maximum depth exceeded, possible circular reference",
            ));
        }

        let v = &self.0;
        match v.type_of() {
            Type::Uninitialized | Type::Undefined | Type::Null => serializer.serialize_none(),
            Type::Bool => serializer.serialize_bool(v.as_bool().unwrap_or_default()),
            Type::Int => serializer.serialize_i32(v.as_int().unwrap_or_default()),
            Type::Float => {
                let f = v.as_float().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
                    #[allow(clippy::cast_possible_truncation)]
                    serializer.serialize_i64(f as i64)
                } else {
                    serializer.serialize_f64(f)
                }
            }
            Type::String => {
                let s = v
                    .as_string()
                    .ok_or_else(|| S::Error::custom("expected string"))?
                    .to_string()
                    .map_err(S::Error::custom)?;
                serializer.serialize_str(&s)
            }
            Type::Array => {
                let arr = v
                    .as_array()
                    .ok_or_else(|| S::Error::custom("expected array"))?;
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for i in 0..arr.len() {
                    let elem: Value<'_> = arr.get(i).map_err(S::Error::custom)?;
                    seq.serialize_element(&self.child(elem))?;
                }
                seq.end()
            }
            Type::Object | Type::Exception | Type::Proxy => {
                let obj = v
                    .as_object()
                    .ok_or_else(|| S::Error::custom("expected object"))?;

                let to_json: Value<'_> = obj.get("toJSON").map_err(S::Error::custom)?;
                if let Some(f) = to_json.as_function() {
                    let replaced: Value<'_> =
                        f.call((This(obj.clone()),)).map_err(S::Error::custom)?;
                    return self.child(replaced).serialize(serializer);
                }

                if let Some(bytes) = obj.as_array_buffer().and_then(|b| b.as_bytes()) {
                    return serializer.serialize_bytes(bytes);
                }
                if let Some(bytes) = obj.as_typed_array::<u8>().and_then(|t| t.as_bytes()) {
                    return serializer.serialize_bytes(bytes);
                }

                let props: Vec<(String, Value<'_>)> = obj
                    .own_props::<String, Value<'_>>(Filter::new().string().enum_only())
                    .collect::<rquickjs::Result<_>>()
                    .map_err(S::Error::custom)?;
                let mut map = serializer.serialize_map(None)?;
                for (key, val) in props {
                    if val.is_undefined() {
                        continue;
                    }
                    map.serialize_entry(&key, &self.child(val))?;
                }
                map.end()
            }
            Type::Promise => Err(S::Error::custom(
                "a promise cannot be serialized; await it first",
            )),
            other => Err(S::Error::custom(format!(
                "value of type {} cannot be serialized",
                other.as_str()
            ))),
        }
    }
}

struct GuestSeed<'js>(Ctx<'js>);

struct GuestVisitor<'js>(Ctx<'js>);

fn custom<E: serde::de::Error>(e: rquickjs::Error) -> E {
    E::custom(e.to_string())
}

impl<'de, 'js> Visitor<'de> for GuestVisitor<'js> {
    type Value = Value<'js>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a JSON value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.into_js(&self.0).map_err(custom)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        // Small integers stay ints so guest code sees `Number.isInteger`.
        if let Ok(i) = i32::try_from(v) {
            i.into_js(&self.0).map_err(custom)
        } else {
            #[allow(clippy::cast_precision_loss)]
            (v as f64).into_js(&self.0).map_err(custom)
        }
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if let Ok(i) = i32::try_from(v) {
            i.into_js(&self.0).map_err(custom)
        } else {
            #[allow(clippy::cast_precision_loss)]
            (v as f64).into_js(&self.0).map_err(custom)
        }
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.into_js(&self.0).map_err(custom)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        rquickjs::String::from_str(self.0.clone(), v)
            .map(rquickjs::String::into_value)
            .map_err(custom)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::new_null(self.0))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::new_null(self.0))
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        GuestSeed(self.0).deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let arr = rquickjs::Array::new(self.0.clone()).map_err(custom)?;
        let mut idx = 0usize;
        while let Some(val) = seq.next_element_seed(GuestSeed(self.0.clone()))? {
            arr.set(idx, val).map_err(custom)?;
            idx += 1;
        }
        Ok(arr.into_value())
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let obj = rquickjs::Object::new(self.0.clone()).map_err(custom)?;
        while let Some(key) = map.next_key::<String>()? {
            let val = map.next_value_seed(GuestSeed(self.0.clone()))?;
            obj.set(key, val).map_err(custom)?;
        }
        Ok(obj.into_value())
    }
}

impl<'de, 'js> DeserializeSeed<'de> for GuestSeed<'js> {
    type Value = Value<'js>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(GuestVisitor(self.0))
    }
}
