//! Script Engine (C4): in-memory storage of Scripts and parameterized
//! Templates, CRUD + render + validate, with an optional durable
//! [`ScriptRepository`] backing.
//!
//! Grounded in `cardlink/scripts/manager.py::ScriptManager` and
//! `cardlink/scripts/db_manager.py::DatabaseScriptManager` from
//! `original_source`: a plain in-memory manager that an optional
//! repository capability can sync to/from, either manually or on every
//! mutation ("auto-sync").

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gp_ota_apdu::CommandApdu;
use uuid::Uuid;

/// Errors produced by the Script Engine.
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    #[error("script '{0}' not found")]
    ScriptNotFound(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("id '{0}' already exists")]
    AlreadyExists(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("missing required parameter '{0}'")]
    MissingRequiredParameter(String),

    #[error("rendered command is not a valid C-APDU: {0}")]
    RenderedCommandInvalid(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("invalid script YAML: {0}")]
    InvalidYaml(String),
}

/// A single APDU command within a Script or Template. `hex` may contain
/// `{placeholder}` tokens when it belongs to a Template.
#[derive(Clone, PartialEq, Debug)]
pub struct ScriptCommand {
    pub hex: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl ScriptCommand {
    pub fn new(hex: impl Into<String>) -> Self {
        Self { hex: hex.into(), name: None, description: None }
    }
}

/// An ordered, named sequence of concrete APDU commands.
#[derive(Clone, PartialEq, Debug)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub commands: Vec<ScriptCommand>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The type of a Template parameter, governing how a substituted value is
/// rendered to hex text.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParamType {
    Hex,
    Int,
    String,
    Bool,
}

impl ParamType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HEX" => Some(Self::Hex),
            "INT" => Some(Self::Int),
            "STRING" => Some(Self::String),
            "BOOL" => Some(Self::Bool),
            _ => None,
        }
    }
}

/// A declared Template parameter.
#[derive(Clone, PartialEq, Debug)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub description: Option<String>,
    /// Byte width used by `INT` rendering (`2 * byte_width` hex digits,
    /// big-endian). Ignored for other types.
    pub byte_width: usize,
}

impl Default for ParamSpec {
    fn default() -> Self {
        Self {
            param_type: ParamType::Hex,
            required: true,
            default: None,
            min_length: None,
            max_length: None,
            description: None,
            byte_width: 1,
        }
    }
}

/// A Script whose command hex strings may carry `{name}` placeholders,
/// plus the parameter schema those placeholders draw from.
#[derive(Clone, PartialEq, Debug)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub commands: Vec<ScriptCommand>,
    pub parameters: BTreeMap<String, ParamSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A typed parameter value supplied at render time.
#[derive(Clone, PartialEq, Debug)]
pub enum ParamValue {
    Hex(String),
    Int(i64),
    String(String),
    Bool(bool),
}

impl ParamValue {
    fn render(&self, spec: &ParamSpec) -> String {
        match self {
            ParamValue::Hex(s) => s.replace(' ', "").to_ascii_uppercase(),
            ParamValue::Int(v) => {
                let mut bytes = Vec::with_capacity(spec.byte_width);
                let mut n = *v;
                for _ in 0..spec.byte_width {
                    bytes.push((n & 0xff) as u8);
                    n >>= 8;
                }
                bytes.reverse();
                hex::encode_upper(bytes)
            }
            ParamValue::String(s) => hex::encode_upper(s.as_bytes()),
            ParamValue::Bool(b) => if *b { "01" } else { "00" }.to_string(),
        }
    }
}

/// Injected capability the execute path hands decoded commands to --
/// bound, in production, to the Admin Server's per-session dispatch queue
/// (`AdminServer::queue_commands`). A one-way push: results surface via
/// the Event Bus, never through this trait's return value.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    async fn enqueue(&self, session_id: Uuid, commands: Vec<Vec<u8>>) -> Result<(), Error>;
}

/// Capability for durable storage backing the in-memory [`ScriptStore`].
/// Implementations may be in-memory-only test doubles or a relational
/// store; the Script Engine itself never reaches into a database
/// directly (spec.md §6 "Script repository interface").
pub trait ScriptRepository: Send + Sync {
    fn get_all_scripts(&self) -> Result<Vec<Script>, Error>;
    fn get_all_templates(&self) -> Result<Vec<Template>, Error>;
    fn save_script(&self, script: &Script) -> Result<(), Error>;
    fn save_template(&self, template: &Template) -> Result<(), Error>;
    fn delete_script(&self, id: &str) -> Result<(), Error>;
    fn delete_template(&self, id: &str) -> Result<(), Error>;
}

/// Validate that `hex` decodes as a well-formed C-APDU.
fn validate_hex_as_command(hex: &str) -> Result<(), String> {
    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    CommandApdu::decode(&bytes).map_err(|e| format!("invalid C-APDU: {e}"))?;
    Ok(())
}

fn validate_script_shape(id: &str, name: &str, commands: &[ScriptCommand]) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("id must not be empty".into());
    }
    if name.trim().is_empty() {
        return Err("name must not be empty".into());
    }
    if commands.is_empty() {
        return Err("commands must not be empty".into());
    }
    for cmd in commands {
        validate_hex_as_command(&cmd.hex)?;
    }
    Ok(())
}

/// Extract every `{token}` placeholder referenced in `hex`.
fn placeholders_in(hex: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = hex.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '{' {
            if let Some(end) = hex[i..].find('}') {
                out.push(hex[i + 1..i + end].to_string());
            }
        }
    }
    out
}

fn validate_template_shape(
    id: &str,
    name: &str,
    commands: &[ScriptCommand],
    parameters: &BTreeMap<String, ParamSpec>,
) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("id must not be empty".into());
    }
    if name.trim().is_empty() {
        return Err("name must not be empty".into());
    }
    if commands.is_empty() {
        return Err("commands must not be empty".into());
    }
    for cmd in commands {
        for token in placeholders_in(&cmd.hex) {
            if !parameters.contains_key(&token) {
                return Err(format!("placeholder '{{{token}}}' has no declared parameter"));
            }
        }
    }
    Ok(())
}

pub fn validate_script(script: &Script) -> Result<(), Error> {
    validate_script_shape(&script.id, &script.name, &script.commands)
        .map_err(Error::Validation)
}

pub fn validate_template(template: &Template) -> Result<(), Error> {
    validate_template_shape(&template.id, &template.name, &template.commands, &template.parameters)
        .map_err(Error::Validation)
}

/// Render a Template's commands with the supplied parameter values,
/// filling defaults for missing optional parameters.
///
/// Invariant (spec.md §3): every rendered hex string decodes as a valid
/// C-APDU, or rendering fails with [`Error::RenderedCommandInvalid`].
pub fn render_template(
    template: &Template,
    values: &BTreeMap<String, ParamValue>,
) -> Result<Vec<Vec<u8>>, Error> {
    let mut resolved: BTreeMap<String, String> = BTreeMap::new();

    for (name, spec) in &template.parameters {
        match values.get(name) {
            Some(v) => resolved.insert(name.clone(), v.render(spec)),
            None => match &spec.default {
                Some(default) => resolved.insert(name.clone(), default.clone()),
                None if spec.required => {
                    return Err(Error::MissingRequiredParameter(name.clone()))
                }
                None => None,
            },
        };
    }

    let mut out = Vec::with_capacity(template.commands.len());
    for cmd in &template.commands {
        let mut rendered = cmd.hex.clone();
        for (name, value) in &resolved {
            rendered = rendered.replace(&format!("{{{name}}}"), value);
        }
        let bytes = hex::decode(&rendered)
            .map_err(|e| Error::RenderedCommandInvalid(format!("{rendered}: {e}")))?;
        CommandApdu::decode(&bytes)
            .map_err(|e| Error::RenderedCommandInvalid(format!("{rendered}: {e}")))?;
        out.push(bytes);
    }

    Ok(out)
}

fn matches_filter(name: &str, description: Option<&str>, tags: &[String], tag: Option<&str>, search: Option<&str>) -> bool {
    if let Some(tag) = tag {
        let tag_lower = tag.to_ascii_lowercase();
        if !tags.iter().any(|t| t.to_ascii_lowercase() == tag_lower) {
            return false;
        }
    }
    if let Some(search) = search {
        let search_lower = search.to_ascii_lowercase();
        let name_hit = name.to_ascii_lowercase().contains(&search_lower);
        let desc_hit = description
            .map(|d| d.to_ascii_lowercase().contains(&search_lower))
            .unwrap_or(false);
        if !name_hit && !desc_hit {
            return false;
        }
    }
    true
}

/// A command as it appears in a Script YAML document: either a bare hex
/// string, or the fuller `{hex, name?, description?}` form.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Hex(String),
    Full { hex: String, name: Option<String>, description: Option<String> },
}

impl From<RawCommand> for ScriptCommand {
    fn from(raw: RawCommand) -> Self {
        match raw {
            RawCommand::Hex(hex) => ScriptCommand::new(hex),
            RawCommand::Full { hex, name, description } => ScriptCommand { hex, name, description },
        }
    }
}

#[derive(serde::Deserialize)]
struct RawScript {
    id: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    commands: Vec<RawCommand>,
}

#[derive(serde::Deserialize)]
struct RawParamSpec {
    #[serde(rename = "type")]
    param_type: String,
    required: Option<bool>,
    default: Option<String>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    description: Option<String>,
    byte_width: Option<usize>,
}

#[derive(serde::Deserialize)]
struct RawTemplate {
    id: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    commands: Vec<RawCommand>,
    #[serde(default)]
    parameters: BTreeMap<String, RawParamSpec>,
}

#[derive(serde::Deserialize, Default)]
struct RawDocument {
    #[serde(default)]
    scripts: Vec<RawScript>,
    #[serde(default)]
    templates: Vec<RawTemplate>,
}

fn raw_param_spec(raw: RawParamSpec) -> Result<ParamSpec, Error> {
    let param_type = ParamType::parse(&raw.param_type)
        .ok_or_else(|| Error::Validation(format!("unknown parameter type '{}'", raw.param_type)))?;
    Ok(ParamSpec {
        param_type,
        required: raw.required.unwrap_or(true),
        default: raw.default,
        min_length: raw.min_length,
        max_length: raw.max_length,
        description: raw.description,
        byte_width: raw.byte_width.unwrap_or(1),
    })
}

/// Outcome of [`ScriptStore::load_yaml`]: counts plus the id/error of every
/// entry that failed to load. One bad entry never aborts the rest of the
/// document.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub scripts_loaded: usize,
    pub templates_loaded: usize,
    pub warnings: Vec<(String, Error)>,
}

/// In-memory indexed store of Scripts and Templates (C4), with optional
/// sync to a durable [`ScriptRepository`].
pub struct ScriptStore {
    scripts: BTreeMap<String, Script>,
    templates: BTreeMap<String, Template>,
    repository: Option<Box<dyn ScriptRepository>>,
    auto_sync: bool,
}

impl Default for ScriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptStore {
    pub fn new() -> Self {
        Self { scripts: BTreeMap::new(), templates: BTreeMap::new(), repository: None, auto_sync: false }
    }

    /// Attach a durable repository. `auto_sync` controls whether every
    /// mutating call also commits to the repository immediately, or
    /// whether sync is only performed via the explicit
    /// `sync_to_repository` / `sync_from_repository` calls.
    pub fn with_repository(mut self, repository: Box<dyn ScriptRepository>, auto_sync: bool) -> Self {
        self.repository = Some(repository);
        self.auto_sync = auto_sync;
        self
    }

    // -- Script CRUD --

    pub fn get_script(&self, id: &str) -> Result<&Script, Error> {
        self.scripts.get(id).ok_or_else(|| Error::ScriptNotFound(id.to_string()))
    }

    pub fn list_scripts(&self, tag: Option<&str>, search: Option<&str>) -> Vec<&Script> {
        self.scripts
            .values()
            .filter(|s| matches_filter(&s.name, s.description.as_deref(), &s.tags, tag, search))
            .collect()
    }

    pub fn create_script(&mut self, script: Script) -> Result<(), Error> {
        if self.scripts.contains_key(&script.id) {
            return Err(Error::AlreadyExists(script.id));
        }
        validate_script(&script)?;
        if self.auto_sync {
            if let Some(repo) = &self.repository {
                repo.save_script(&script)?;
            }
        }
        self.scripts.insert(script.id.clone(), script);
        Ok(())
    }

    pub fn update_script(&mut self, script: Script) -> Result<(), Error> {
        if !self.scripts.contains_key(&script.id) {
            return Err(Error::ScriptNotFound(script.id));
        }
        validate_script(&script)?;
        if self.auto_sync {
            if let Some(repo) = &self.repository {
                repo.save_script(&script)?;
            }
        }
        self.scripts.insert(script.id.clone(), script);
        Ok(())
    }

    pub fn delete_script(&mut self, id: &str) -> Result<(), Error> {
        if self.scripts.remove(id).is_none() {
            return Err(Error::ScriptNotFound(id.to_string()));
        }
        if self.auto_sync {
            if let Some(repo) = &self.repository {
                repo.delete_script(id)?;
            }
        }
        Ok(())
    }

    // -- Template CRUD --

    pub fn get_template(&self, id: &str) -> Result<&Template, Error> {
        self.templates.get(id).ok_or_else(|| Error::TemplateNotFound(id.to_string()))
    }

    pub fn list_templates(&self, tag: Option<&str>, search: Option<&str>) -> Vec<&Template> {
        self.templates
            .values()
            .filter(|t| matches_filter(&t.name, t.description.as_deref(), &t.tags, tag, search))
            .collect()
    }

    pub fn create_template(&mut self, template: Template) -> Result<(), Error> {
        if self.templates.contains_key(&template.id) {
            return Err(Error::AlreadyExists(template.id));
        }
        validate_template(&template)?;
        if self.auto_sync {
            if let Some(repo) = &self.repository {
                repo.save_template(&template)?;
            }
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn update_template(&mut self, template: Template) -> Result<(), Error> {
        if !self.templates.contains_key(&template.id) {
            return Err(Error::TemplateNotFound(template.id));
        }
        validate_template(&template)?;
        if self.auto_sync {
            if let Some(repo) = &self.repository {
                repo.save_template(&template)?;
            }
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn delete_template(&mut self, id: &str) -> Result<(), Error> {
        if self.templates.remove(id).is_none() {
            return Err(Error::TemplateNotFound(id.to_string()));
        }
        if self.auto_sync {
            if let Some(repo) = &self.repository {
                repo.delete_template(id)?;
            }
        }
        Ok(())
    }

    /// Render `template_id` with `values`, returning the decoded C-APDU
    /// byte sequence ready for the Admin Server's command queue.
    pub fn render(&self, template_id: &str, values: &BTreeMap<String, ParamValue>) -> Result<Vec<Vec<u8>>, Error> {
        let template = self.get_template(template_id)?;
        render_template(template, values)
    }

    /// Decode every command of `script_id` to raw C-APDU bytes, in order.
    pub fn decode_commands(&self, script_id: &str) -> Result<Vec<Vec<u8>>, Error> {
        let script = self.get_script(script_id)?;
        script
            .commands
            .iter()
            .map(|cmd| hex::decode(&cmd.hex).map_err(|e| Error::Validation(format!("{}: invalid hex: {e}", cmd.hex))))
            .collect()
    }

    /// Execute path (spec.md §4.4): look up `script_id`, decode its
    /// commands to bytes, and hand the ordered list to `queue` for
    /// `session_id`. Returns the number of commands enqueued.
    pub async fn execute(
        &self,
        script_id: &str,
        session_id: Uuid,
        queue: &dyn CommandQueue,
    ) -> Result<usize, Error> {
        let commands = self.decode_commands(script_id)?;
        let n = commands.len();
        queue.enqueue(session_id, commands).await?;
        Ok(n)
    }

    pub fn get_all_tags(&self) -> Vec<String> {
        let mut tags: std::collections::BTreeSet<String> = Default::default();
        for s in self.scripts.values() {
            tags.extend(s.tags.iter().cloned());
        }
        for t in self.templates.values() {
            tags.extend(t.tags.iter().cloned());
        }
        tags.into_iter().collect()
    }

    pub fn count(&self) -> (usize, usize) {
        (self.scripts.len(), self.templates.len())
    }

    /// Replace in-memory contents with whatever the repository holds.
    pub fn sync_from_repository(&mut self) -> Result<(), Error> {
        let repo = self.repository.as_ref().ok_or_else(|| {
            Error::Repository("no repository attached".into())
        })?;
        let scripts = repo.get_all_scripts()?;
        let templates = repo.get_all_templates()?;
        self.scripts = scripts.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.templates = templates.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(())
    }

    /// Push every in-memory Script and Template to the repository.
    pub fn sync_to_repository(&self) -> Result<(), Error> {
        let repo = self.repository.as_ref().ok_or_else(|| {
            Error::Repository("no repository attached".into())
        })?;
        for script in self.scripts.values() {
            repo.save_script(script)?;
        }
        for template in self.templates.values() {
            repo.save_template(template)?;
        }
        Ok(())
    }

    /// Parse a Script YAML document (spec.md §6 "Script YAML on disk") and
    /// load every entry into this store. A duplicate id or failed
    /// validation fails the load for that one entry -- collected into
    /// `LoadReport.warnings` -- rather than aborting the whole document.
    pub fn load_yaml(&mut self, document: &str) -> Result<LoadReport, Error> {
        let raw: RawDocument =
            serde_yaml::from_str(document).map_err(|e| Error::InvalidYaml(e.to_string()))?;
        let mut report = LoadReport::default();

        for raw_script in raw.scripts {
            let id = raw_script.id.clone();
            let script = Script {
                id: raw_script.id,
                name: raw_script.name,
                description: raw_script.description,
                tags: raw_script.tags,
                commands: raw_script.commands.into_iter().map(ScriptCommand::from).collect(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            match self.create_script(script) {
                Ok(()) => report.scripts_loaded += 1,
                Err(e) => report.warnings.push((id, e)),
            }
        }

        for raw_template in raw.templates {
            let id = raw_template.id.clone();
            let parameters: Result<BTreeMap<String, ParamSpec>, Error> = raw_template
                .parameters
                .into_iter()
                .map(|(name, spec)| raw_param_spec(spec).map(|spec| (name, spec)))
                .collect();
            let parameters = match parameters {
                Ok(p) => p,
                Err(e) => {
                    report.warnings.push((id, e));
                    continue;
                }
            };

            let template = Template {
                id: raw_template.id,
                name: raw_template.name,
                description: raw_template.description,
                tags: raw_template.tags,
                commands: raw_template.commands.into_iter().map(ScriptCommand::from).collect(),
                parameters,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            match self.create_template(template) {
                Ok(()) => report.templates_loaded += 1,
                Err(e) => report.warnings.push((id, e)),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn select_isd() -> Script {
        Script {
            id: "select-isd".into(),
            name: "Select ISD".into(),
            description: Some("Select the issuer security domain".into()),
            tags: vec!["gp".into()],
            commands: vec![ScriptCommand::new("00A4040007A0000000031010".to_string())],
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn create_and_get_script() {
        let mut store = ScriptStore::new();
        store.create_script(select_isd()).unwrap();
        assert_eq!(store.get_script("select-isd").unwrap().name, "Select ISD");
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut store = ScriptStore::new();
        store.create_script(select_isd()).unwrap();
        assert!(matches!(store.create_script(select_isd()), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn empty_commands_rejected() {
        let mut store = ScriptStore::new();
        let mut s = select_isd();
        s.commands.clear();
        assert!(matches!(store.create_script(s), Err(Error::Validation(_))));
    }

    #[test]
    fn invalid_hex_rejected() {
        let mut store = ScriptStore::new();
        let mut s = select_isd();
        s.commands = vec![ScriptCommand::new("00")];
        assert!(matches!(store.create_script(s), Err(Error::Validation(_))));
    }

    #[test]
    fn tag_and_search_filter() {
        let mut store = ScriptStore::new();
        store.create_script(select_isd()).unwrap();
        assert_eq!(store.list_scripts(Some("gp"), None).len(), 1);
        assert_eq!(store.list_scripts(Some("nope"), None).len(), 0);
        assert_eq!(store.list_scripts(None, Some("select")).len(), 1);
        assert_eq!(store.list_scripts(None, Some("zzz")).len(), 0);
    }

    fn put_key_template() -> Template {
        let mut params = BTreeMap::new();
        params.insert(
            "kvn".into(),
            ParamSpec { param_type: ParamType::Hex, required: true, byte_width: 1, ..Default::default() },
        );
        params.insert(
            "count".into(),
            ParamSpec {
                param_type: ParamType::Int,
                required: false,
                default: Some("01".into()),
                byte_width: 1,
                ..Default::default()
            },
        );
        Template {
            id: "put-key".into(),
            name: "Put Key".into(),
            description: None,
            tags: vec![],
            commands: vec![ScriptCommand::new("8008{kvn}00020102".to_string())],
            parameters: params,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn render_substitutes_placeholder_and_decodes() {
        let mut store = ScriptStore::new();
        store.create_template(put_key_template()).unwrap();

        let mut values = BTreeMap::new();
        values.insert("kvn".to_string(), ParamValue::Hex("0F".into()));

        let rendered = store.render("put-key", &values).unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0][2], 0x0f);
        CommandApdu::decode(&rendered[0]).unwrap();
    }

    #[test]
    fn render_missing_required_parameter_fails() {
        let mut store = ScriptStore::new();
        store.create_template(put_key_template()).unwrap();
        let err = store.render("put-key", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredParameter(p) if p == "kvn"));
    }

    #[test]
    fn template_with_undeclared_placeholder_rejected() {
        let mut store = ScriptStore::new();
        let mut t = put_key_template();
        t.commands.push(ScriptCommand::new("00{unknown}00".to_string()));
        assert!(matches!(store.create_template(t), Err(Error::Validation(_))));
    }

    #[test]
    fn int_param_renders_big_endian_with_declared_width() {
        let mut params = BTreeMap::new();
        params.insert(
            "len".into(),
            ParamSpec { param_type: ParamType::Int, required: true, byte_width: 2, ..Default::default() },
        );
        let template = Template {
            id: "t".into(),
            name: "t".into(),
            description: None,
            tags: vec![],
            commands: vec![ScriptCommand::new("00E80000{len}".to_string())],
            parameters: params,
            created_at: now(),
            updated_at: now(),
        };

        let mut store = ScriptStore::new();
        store.create_template(template).unwrap();

        let mut values = BTreeMap::new();
        values.insert("len".to_string(), ParamValue::Int(0x0102));
        let rendered = store.render("t", &values).unwrap();
        assert_eq!(&rendered[0][4..], &[0x01, 0x02]);
    }

    #[test]
    fn bool_param_renders_01_or_00() {
        assert_eq!(ParamValue::Bool(true).render(&ParamSpec::default()), "01");
        assert_eq!(ParamValue::Bool(false).render(&ParamSpec::default()), "00");
    }

    #[test]
    fn string_param_renders_as_hex_encoded_utf8() {
        let rendered = ParamValue::String("AB".into()).render(&ParamSpec::default());
        assert_eq!(rendered, "4142");
    }

    #[test]
    fn decode_commands_returns_raw_bytes_in_order() {
        let mut store = ScriptStore::new();
        store.create_script(select_isd()).unwrap();
        let decoded = store.decode_commands("select-isd").unwrap();
        assert_eq!(decoded, vec![hex::decode("00A4040007A0000000031010").unwrap()]);
    }

    #[derive(Default)]
    struct RecordingQueue {
        calls: std::sync::Mutex<Vec<(Uuid, Vec<Vec<u8>>)>>,
    }

    #[async_trait]
    impl CommandQueue for RecordingQueue {
        async fn enqueue(&self, session_id: Uuid, commands: Vec<Vec<u8>>) -> Result<(), Error> {
            self.calls.lock().unwrap().push((session_id, commands));
            Ok(())
        }
    }

    #[tokio::test]
    async fn execute_decodes_script_commands_in_order_and_enqueues_them() {
        let mut store = ScriptStore::new();
        store.create_script(select_isd()).unwrap();
        let queue = RecordingQueue::default();
        let session_id = Uuid::new_v4();

        let n = store.execute("select-isd", session_id, &queue).await.unwrap();
        assert_eq!(n, 1);

        let calls = queue.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, session_id);
        assert_eq!(calls[0].1, vec![hex::decode("00A4040007A0000000031010").unwrap()]);
    }

    #[tokio::test]
    async fn execute_unknown_script_never_reaches_the_queue() {
        let store = ScriptStore::new();
        let queue = RecordingQueue::default();
        let err = store.execute("nope", Uuid::new_v4(), &queue).await.unwrap_err();
        assert!(matches!(err, Error::ScriptNotFound(_)));
        assert!(queue.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn load_yaml_collects_scripts_and_templates_and_warns_on_duplicate_id() {
        let mut store = ScriptStore::new();
        let doc = r#"
scripts:
  - id: select-isd
    name: Select ISD
    tags: [gp]
    commands:
      - 00A4040007A0000000031010
  - id: select-isd
    name: Duplicate Select ISD
    commands:
      - 00A4040007A0000000031010
templates:
  - id: put-key
    name: Put Key
    commands:
      - hex: "8008{kvn}00020102"
        name: put key
    parameters:
      kvn:
        type: HEX
        required: true
"#;
        let report = store.load_yaml(doc).unwrap();
        assert_eq!(report.scripts_loaded, 1);
        assert_eq!(report.templates_loaded, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].0, "select-isd");
        assert!(matches!(report.warnings[0].1, Error::AlreadyExists(_)));

        assert_eq!(store.get_script("select-isd").unwrap().name, "Select ISD");
        let template = store.get_template("put-key").unwrap();
        assert_eq!(template.commands[0].name.as_deref(), Some("put key"));
    }

    #[test]
    fn load_yaml_rejects_unknown_parameter_type_without_aborting_document() {
        let mut store = ScriptStore::new();
        let doc = r#"
scripts:
  - id: select-isd
    name: Select ISD
    commands:
      - 00A4040007A0000000031010
templates:
  - id: bad-template
    name: Bad Template
    commands:
      - "00{x}00"
    parameters:
      x:
        type: NOT_A_TYPE
"#;
        let report = store.load_yaml(doc).unwrap();
        assert_eq!(report.scripts_loaded, 1);
        assert_eq!(report.templates_loaded, 0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].0, "bad-template");
        assert!(store.get_template("bad-template").is_err());
    }

    #[test]
    fn load_yaml_rejects_malformed_document() {
        let mut store = ScriptStore::new();
        let err = store.load_yaml("scripts: [this is not, a valid: list").unwrap_err();
        assert!(matches!(err, Error::InvalidYaml(_)));
    }
}
