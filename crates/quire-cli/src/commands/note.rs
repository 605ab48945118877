use quire_core::models::NoteInput;

use crate::commands::common::{
    format_note_detail, format_note_lines, parse_links, read_piped_stdin, StoreOptions,
};
use crate::error::CliError;

pub struct NoteFields {
    pub title: Option<String>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub private: Option<bool>,
    pub categories: Option<Vec<String>>,
}

pub fn run_note_add(
    title: &str,
    body: Option<String>,
    description: Option<String>,
    private: bool,
    categories: &[String],
    options: &StoreOptions,
) -> Result<(), CliError> {
    let body = match body {
        Some(body) => body,
        None => read_piped_stdin()?.unwrap_or_default(),
    };
    let mut input = NoteInput::new(title.trim(), body).with_categories(parse_links(categories)?);
    input.description = description;
    input.is_private = private;

    let mut store = options.open()?;
    let note = store.create_note(input)?.into_value();
    println!("{}", note.guid);
    Ok(())
}

pub fn run_note_list(
    limit: usize,
    offset: usize,
    as_json: bool,
    options: &StoreOptions,
) -> Result<(), CliError> {
    let store = options.open()?;
    let notes = store.list_notes(limit, offset)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_note_show(guid: &str, as_json: bool, options: &StoreOptions) -> Result<(), CliError> {
    let store = options.open()?;
    let note = store
        .get_note(guid.trim())?
        .ok_or_else(|| CliError::NoteNotFound(guid.to_string()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&note)?);
    } else {
        for line in format_note_detail(&note) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_note_edit(guid: &str, fields: NoteFields, options: &StoreOptions) -> Result<(), CliError> {
    let guid = guid.trim();
    let mut store = options.open()?;
    let note = store
        .get_note(guid)?
        .ok_or_else(|| CliError::NoteNotFound(guid.to_string()))?;

    let mut input = note.to_input();
    if let Some(title) = fields.title {
        input.title = title.trim().to_string();
    }
    if let Some(body) = fields.body {
        input.body = body;
    }
    if let Some(description) = fields.description {
        input.description = Some(description).filter(|value| !value.trim().is_empty());
    }
    if let Some(private) = fields.private {
        input.is_private = private;
    }
    if let Some(categories) = fields.categories {
        input = input.with_categories(parse_links(&categories)?);
    }

    let updated = store.update_note(guid, input)?.into_value();
    println!("{}", updated.guid);
    Ok(())
}

pub fn run_note_delete(guid: &str, options: &StoreOptions) -> Result<(), CliError> {
    let guid = guid.trim();
    let mut store = options.open()?;
    if !store.delete_note(guid)?.into_value() {
        return Err(CliError::NoteNotFound(guid.to_string()));
    }
    println!("{guid}");
    Ok(())
}
