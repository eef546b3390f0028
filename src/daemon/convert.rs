use std::collections::{BTreeMap, HashMap};

use tracing::warn;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::daemon::dbus_proxies::ObjectList;
use crate::error::{WcaError, WcaResult};
use crate::model::{ObjectPath, PropertyMap, PropertyValue};

// ── Value extraction via pattern matching ─────────────────────────────

/// Convert a D-Bus value into the mirrored representation.
/// Returns `None` for shapes the mirror does not carry (floats, fds).
pub fn to_property_value(v: &Value<'_>) -> Option<PropertyValue> {
    match v {
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::U8(n) => Some(PropertyValue::Int(i64::from(*n))),
        Value::I16(n) => Some(PropertyValue::Int(i64::from(*n))),
        Value::U16(n) => Some(PropertyValue::Int(i64::from(*n))),
        Value::I32(n) => Some(PropertyValue::Int(i64::from(*n))),
        Value::U32(n) => Some(PropertyValue::Int(i64::from(*n))),
        Value::I64(n) => Some(PropertyValue::Int(*n)),
        Value::U64(n) => i64::try_from(*n).ok().map(PropertyValue::Int),
        Value::Str(s) => Some(PropertyValue::Str(s.to_string())),
        Value::ObjectPath(p) => Some(PropertyValue::Str(p.to_string())),
        Value::Signature(s) => Some(PropertyValue::Str(s.to_string())),
        Value::Value(inner) => to_property_value(inner),
        Value::Array(arr) => arr
            .iter()
            .map(to_property_value)
            .collect::<Option<Vec<_>>>()
            .map(PropertyValue::List),
        Value::Structure(s) => s
            .fields()
            .iter()
            .map(to_property_value)
            .collect::<Option<Vec<_>>>()
            .map(PropertyValue::List),
        Value::Dict(_) => {
            let owned = v.try_to_owned().ok()?;
            let dict = HashMap::<String, OwnedValue>::try_from(owned).ok()?;
            let mut map = BTreeMap::new();
            for (key, value) in &dict {
                map.insert(key.clone(), to_property_value(value)?);
            }
            Some(PropertyValue::Map(map))
        }
        _ => None,
    }
}

/// Convert a property dictionary, skipping entries that cannot be mirrored
pub fn to_property_map(dict: &HashMap<String, OwnedValue>) -> PropertyMap {
    dict.iter()
        .filter_map(|(name, value)| match to_property_value(value) {
            Some(v) => Some((name.clone(), v)),
            None => {
                warn!("Skipping property {} with unsupported value", name);
                None
            }
        })
        .collect()
}

/// Convert a `(path, properties)` list as returned by the Manager getters
pub fn to_entities(list: ObjectList) -> Vec<(ObjectPath, PropertyMap)> {
    list.into_iter()
        .map(|(path, props)| (to_object_path(&path), to_property_map(&props)))
        .collect()
}

pub fn to_object_path(path: &OwnedObjectPath) -> ObjectPath {
    ObjectPath::new(path.as_str())
}

/// Convert a value for a `SetProperty` call. ConnMan only accepts scalars
/// and string arrays as writable properties.
pub fn to_value(v: &PropertyValue) -> WcaResult<Value<'static>> {
    match v {
        PropertyValue::Bool(b) => Ok(Value::from(*b)),
        PropertyValue::Int(n) => Ok(Value::from(*n)),
        PropertyValue::Str(s) => Ok(Value::from(s.clone())),
        PropertyValue::List(items) => {
            let strings = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| {
                    WcaError::InvalidArgument("only string lists can be written".into())
                })?;
            Ok(Value::from(strings))
        }
        PropertyValue::Map(_) => Err(WcaError::InvalidArgument(
            "dictionary properties cannot be written".into(),
        )),
    }
}
