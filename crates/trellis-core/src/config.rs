use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use serde::{
  Deserialize,
  Deserializer,
  Serialize
};
use tracing::{
  debug,
  info
};
use trellis_shared::Status;

pub const CONFIG_FILE_NAME: &str =
  "trellis.toml";
pub const CONFIG_ENV_VAR: &str =
  "TRELLIS_CONFIG";

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
  /// Board columns, left to right.
  #[serde(
    deserialize_with = "statuses_from_names"
  )]
  pub columns:           Vec<Status>,
  pub column_page_size:  u32,
  pub flat_page_size:    u32,
  pub page_size_options: Vec<u32>
}

impl Default for BoardConfig {
  fn default() -> Self {
    Self {
      columns:           vec![
        Status::Pending,
        Status::Active,
        Status::Overdue,
        Status::Done,
      ],
      column_page_size:  10,
      flat_page_size:    25,
      page_size_options: vec![
        10, 25, 50, 100, 200,
      ]
    }
  }
}

impl BoardConfig {
  /// Load from `override_path`, the
  /// `TRELLIS_CONFIG` file, or the
  /// nearest `trellis.toml`; defaults
  /// when none exists.
  #[tracing::instrument]
  pub fn load(
    override_path: Option<&Path>
  ) -> anyhow::Result<Self> {
    let Some(path) =
      resolve_config_path(override_path)?
    else {
      debug!(
        "no config file found; using \
         defaults"
      );
      return Ok(Self::default());
    };

    info!(config = %path.display(), "loading board config");
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;

    Self::from_toml_str(&text)
      .with_context(|| {
        format!(
          "invalid config {}",
          path.display()
        )
      })
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let cfg: Self = toml::from_str(text)
      .map_err(anyhow::Error::new)
      .context(
        "failed to parse TOML"
      )?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn validate(
    &self
  ) -> anyhow::Result<()> {
    if self.columns.is_empty() {
      bail!(
        "at least one column is \
         required"
      );
    }

    for (idx, status) in
      self.columns.iter().enumerate()
    {
      if self.columns[..idx]
        .contains(status)
      {
        bail!(
          "column {status} is listed \
           twice"
        );
      }
    }

    if self.column_page_size == 0 {
      bail!(
        "column_page_size must be \
         positive"
      );
    }

    if self
      .page_size_options
      .contains(&0)
    {
      bail!(
        "page_size_options cannot \
         contain 0"
      );
    }

    if !self.is_page_size_allowed(
      self.flat_page_size
    ) {
      bail!(
        "flat_page_size {} is not one \
         of page_size_options {:?}",
        self.flat_page_size,
        self.page_size_options
      );
    }

    Ok(())
  }

  pub fn is_page_size_allowed(
    &self,
    page_size: u32
  ) -> bool {
    page_size > 0
      && self
        .page_size_options
        .contains(&page_size)
  }
}

fn statuses_from_names<'de, D>(
  deserializer: D
) -> Result<Vec<Status>, D::Error>
where
  D: Deserializer<'de>
{
  let names =
    Vec::<String>::deserialize(
      deserializer
    )?;
  names
    .iter()
    .map(|name| {
      name
        .parse::<Status>()
        .map_err(serde::de::Error::custom)
    })
    .collect()
}

fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    let path = expand_tilde(path);
    if !path.is_file() {
      return Err(anyhow!(
        "config file {} does not \
         exist",
        path.display()
      ));
    }
    return Ok(Some(path));
  }

  if let Ok(env_path) =
    std::env::var(CONFIG_ENV_VAR)
  {
    let trimmed = env_path.trim();
    if !trimmed.is_empty() {
      let path =
        expand_tilde(Path::new(trimmed));
      if !path.is_file() {
        return Err(anyhow!(
          "{CONFIG_ENV_VAR} points at \
           missing file {}",
          path.display()
        ));
      }
      return Ok(Some(path));
    }
  }

  if let Ok(cwd) = std::env::current_dir()
  {
    let mut cursor = Some(cwd.as_path());
    while let Some(dir) = cursor {
      let candidate =
        dir.join(CONFIG_FILE_NAME);
      if candidate.is_file() {
        return Ok(Some(candidate));
      }
      cursor = dir.parent();
    }
  }

  let user_config =
    dirs::config_dir().map(|dir| {
      dir
        .join("trellis")
        .join(CONFIG_FILE_NAME)
    });
  Ok(
    user_config
      .filter(|path| path.is_file())
  )
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
