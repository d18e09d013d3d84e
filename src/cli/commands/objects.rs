//! Object commands: `apply`, `get`, `delete` and `list`.

use crate::cli::{ApplyArgs, CommandContext, DeleteArgs, ListArgs, ObjectArgs};
use crate::error::{Result, StoreError};
use crate::model::{FieldFilter, ListOptions, Object, Row};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Create the object, or update it if it already exists.
///
/// With `--expected-version` the write is always an update guarded by that
/// version.
///
/// # Errors
///
/// Returns an error if the document is unreadable or has no name, or the
/// write fails (`Conflict`, `NotFound`).
pub fn apply(args: &ApplyArgs, ctx: &CommandContext) -> Result<()> {
    let value = read_document(&args.file)?;
    let object = object_from_document(value, args.namespace.as_deref(), args.name.as_deref())?;
    let mut store = ctx.open(&args.table)?;

    let (row, action) = if let Some(expected) = args.expected_version {
        (store.update(&object, Some(expected))?, "updated")
    } else {
        match store.create(&object) {
            Ok(row) => (row, "created"),
            Err(err) if err.is_already_exists() => {
                debug!(name = %object.name, "exists, updating");
                (store.update(&object, None)?, "updated")
            }
            Err(err) => return Err(err),
        }
    };

    if ctx.json {
        return ctx.print_json(&row);
    }
    println!(
        "{} {} {action} at {}",
        args.table,
        display_key(&row),
        row.resource_version
    );
    Ok(())
}

/// Print one live object.
///
/// # Errors
///
/// Returns `NotFound` if there is no live object.
pub fn get(args: &ObjectArgs, ctx: &CommandContext) -> Result<()> {
    let store = ctx.open(&args.table)?;
    let row = store.get(&args.namespace, &args.name)?;
    if ctx.json {
        return ctx.print_json(&row);
    }
    println!("# {} resource_version={}", display_key(&row), row.resource_version);
    println!("{}", serde_json::to_string_pretty(&row.value)?);
    Ok(())
}

/// Soft-delete an object.
///
/// # Errors
///
/// Returns `NotFound` or `Conflict`.
pub fn delete(args: &DeleteArgs, ctx: &CommandContext) -> Result<()> {
    let object = &args.object;
    let mut store = ctx.open(&object.table)?;
    let row = store.delete(&object.namespace, &object.name, args.expected_version)?;
    if ctx.json {
        return ctx.print_json(&row);
    }
    println!(
        "{} {} deleted at {}",
        object.table,
        display_key(&row),
        row.resource_version
    );
    Ok(())
}

/// List objects, one page at a time when `--limit` is set.
///
/// # Errors
///
/// Returns an error for a bad selector, an undeclared field or a malformed
/// continue token.
pub fn list(args: &ListArgs, ctx: &CommandContext) -> Result<()> {
    let store = ctx.open(&args.table)?;
    let filters = args
        .field_selector
        .as_deref()
        .map(str::parse::<FieldFilter>)
        .transpose()?
        .unwrap_or_default();
    let options = ListOptions {
        filters,
        limit: args.limit,
        continue_token: args.continue_token.clone(),
        include_deleted: args.include_deleted,
    };
    let page = store.list(args.namespace.as_deref(), &options)?;

    if ctx.json {
        return ctx.print_json(&page);
    }
    for row in &page.rows {
        let marker = if row.is_deleted() { " (deleted)" } else { "" };
        println!("{}\t{}{marker}", display_key(row), row.resource_version);
    }
    if let Some(token) = &page.continue_token {
        println!("continue: {token}");
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<Value> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Build an [`Object`], taking namespace, name and uid from `metadata`
/// unless overridden.
fn object_from_document(
    value: Value,
    namespace: Option<&str>,
    name: Option<&str>,
) -> Result<Object> {
    let metadata = |key: &str| {
        value
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let namespace = namespace
        .map(str::to_string)
        .or_else(|| metadata("namespace"))
        .unwrap_or_default();
    let name = name
        .map(str::to_string)
        .or_else(|| metadata("name"))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            StoreError::InvalidArgument("document has no metadata.name and --name is unset".into())
        })?;
    let uid = metadata("uid");

    let object = Object::new(namespace, name, value);
    Ok(match uid {
        Some(uid) => object.with_uid(uid),
        None => object,
    })
}

fn display_key(row: &Row) -> String {
    if row.namespace.is_empty() {
        row.name.clone()
    } else {
        format!("{}/{}", row.namespace, row.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_supplies_key_and_uid() {
        let doc = json!({"metadata": {"namespace": "ns", "name": "a", "uid": "u-1"}});
        let object = object_from_document(doc, None, None).unwrap();
        assert_eq!(object.namespace, "ns");
        assert_eq!(object.name, "a");
        assert_eq!(object.uid.as_deref(), Some("u-1"));
    }

    #[test]
    fn flags_override_metadata() {
        let doc = json!({"metadata": {"namespace": "ns", "name": "a"}});
        let object = object_from_document(doc, Some(""), Some("b")).unwrap();
        assert_eq!(object.namespace, "");
        assert_eq!(object.name, "b");
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = object_from_document(json!({"spec": {}}), None, None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
