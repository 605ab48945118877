use quire_core::models::CategoryInput;

use crate::commands::common::{format_category_lines, StoreOptions};
use crate::error::CliError;

pub struct CategoryFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent: Option<String>,
}

pub fn run_category_add(
    name: &str,
    fields: CategoryFields,
    options: &StoreOptions,
) -> Result<(), CliError> {
    let mut input = CategoryInput::new(name.trim());
    input.description = fields.description;
    input.color = fields.color;
    input.parent_guid = fields.parent;

    let mut store = options.open()?;
    let category = store.create_category(input)?.into_value();
    println!("{}", category.guid);
    Ok(())
}

pub fn run_category_list(as_json: bool, options: &StoreOptions) -> Result<(), CliError> {
    let store = options.open()?;
    let categories = store.list_categories()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
    } else if categories.is_empty() {
        println!("No categories.");
    } else {
        for line in format_category_lines(&categories) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_category_edit(
    guid: &str,
    fields: CategoryFields,
    options: &StoreOptions,
) -> Result<(), CliError> {
    let guid = guid.trim();
    let mut store = options.open()?;
    let category = store
        .get_category(guid)?
        .ok_or_else(|| CliError::CategoryNotFound(guid.to_string()))?;

    let mut input = category.to_input();
    if let Some(name) = fields.name {
        input.name = name.trim().to_string();
    }
    if let Some(description) = fields.description {
        input.description = Some(description).filter(|value| !value.trim().is_empty());
    }
    if let Some(color) = fields.color {
        input.color = Some(color).filter(|value| !value.trim().is_empty());
    }
    if let Some(parent) = fields.parent {
        input.parent_guid = Some(parent).filter(|value| !value.trim().is_empty());
    }

    let updated = store.update_category(guid, input)?.into_value();
    println!("{}", updated.guid);
    Ok(())
}

pub fn run_category_delete(guid: &str, options: &StoreOptions) -> Result<(), CliError> {
    let guid = guid.trim();
    let mut store = options.open()?;
    if !store.delete_category(guid)?.into_value() {
        return Err(CliError::CategoryNotFound(guid.to_string()));
    }
    println!("{guid}");
    Ok(())
}
