use crate::error::RegistryError;

const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// A parsed container image reference such as `alpine:latest`,
/// `ghcr.io/owner/repo:v1` or `nginx@sha256:...`.
#[derive(Debug, Clone)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RegistryError::InvalidReference(
                "empty reference".to_string(),
            ));
        }

        let (rest, digest) = match input.rsplit_once('@') {
            Some((rest, d)) => (rest, Some(d.to_string())),
            None => (input, None),
        };

        // A trailing `:tag` only counts when the part after the colon is not
        // a registry port (i.e. contains no slash).
        let (name, tag) = match rest.rsplit_once(':') {
            Some((name, t)) if digest.is_none() && !t.contains('/') => {
                (name, Some(t.to_string()))
            }
            _ => (rest, None),
        };

        if name.is_empty() {
            return Err(RegistryError::InvalidReference(input.to_string()));
        }

        let (registry, repository) = split_registry(name);

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The tag or digest to request from the registry.
    pub fn version(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(d), _) => d.clone(),
            (None, Some(t)) => t.clone(),
            (None, None) => "latest".to_string(),
        }
    }

    /// Copy of this reference pinned to a specific manifest digest.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(d) = &self.digest {
            write!(f, "@{}", d)
        } else {
            write!(f, ":{}", self.version())
        }
    }
}

fn split_registry(name: &str) -> (String, String) {
    if let Some((head, tail)) = name.split_once('/') {
        // A leading component with a dot, a port, or "localhost" is a
        // registry host; anything else is a docker.io namespace.
        if head.contains('.') || head.contains(':') || head == "localhost" {
            return (head.to_string(), tail.to_string());
        }
        return (DEFAULT_REGISTRY.to_string(), name.to_string());
    }

    (DEFAULT_REGISTRY.to_string(), format!("library/{}", name))
}
