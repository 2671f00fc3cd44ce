use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

/// A container image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("image reference cannot be empty");
        }
        if s.contains(char::is_whitespace) {
            bail!("image reference '{}' contains whitespace", s);
        }
        if s.starts_with('-') {
            bail!("image reference '{}' cannot start with '-'", s);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if digest.is_empty() {
                    bail!("image reference '{}' has an empty digest", s);
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                if tag.is_empty() {
                    bail!("image reference '{}' has an empty tag", s);
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            bail!("image reference '{}' has an invalid repository", s);
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Same image with a different tag. Drops any pinned digest.
    pub fn with_tag(&self, tag: &str) -> Result<Self> {
        if tag.is_empty() || tag.contains(|c: char| c.is_whitespace() || c == '/' || c == ':') {
            bail!("invalid image tag '{}'", tag);
        }
        Ok(Self {
            tag: Some(tag.to_string()),
            digest: None,
            ..self.clone()
        })
    }
}

impl FromStr for ImageRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
