//! Deployment request validation

use std::collections::BTreeMap;

use url::Url;

use crate::models::{DeploymentKind, DeploymentRequest};
use crate::storage::settings::FrameworkDescriptor;

/// Validate a deployment request, returning every problem found.
///
/// An empty list means the request is acceptable.
pub fn validate_request(
    request: &DeploymentRequest,
    frameworks: &BTreeMap<String, FrameworkDescriptor>,
) -> Vec<String> {
    let mut errors = Vec::new();

    if request.name.is_empty() {
        errors.push("Missing required field: name".to_string());
    } else if !valid_name(&request.name) {
        errors.push(
            "Invalid deployment name. Must be alphanumeric with hyphens/underscores, 3-50 characters"
                .to_string(),
        );
    }

    if request.framework.is_empty() {
        errors.push("Missing required field: framework".to_string());
    } else if !frameworks.contains_key(&request.framework) {
        errors.push(format!("Unsupported framework: {}", request.framework));
    }

    if request.repo_url.is_empty() {
        errors.push("Missing required field: repo_url".to_string());
    } else if !valid_repo_url(&request.repo_url) {
        errors.push("Invalid repository URL. Must be a valid GitHub repository URL".to_string());
    }

    errors.extend(validate_resources(request));

    errors
}

fn valid_name(name: &str) -> bool {
    (3..=50).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn valid_repo_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    if url.host_str() != Some("github.com") {
        return false;
    }
    // Expect /owner/repo, nothing deeper
    let segments: Vec<&str> = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    segments.len() == 2
}

fn validate_resources(request: &DeploymentRequest) -> Vec<String> {
    let mut errors = Vec::new();

    let (cores, memory, disk) = match request.kind {
        DeploymentKind::Vm => ((1, 16), (512, 32768), (10, 500)),
        DeploymentKind::Lxc => ((1, 8), (256, 16384), (5, 200)),
    };

    if let Some(value) = request.resources.cores {
        if value < cores.0 || value > cores.1 {
            errors.push(format!("Cores must be between {} and {}", cores.0, cores.1));
        }
    }
    if let Some(value) = request.resources.memory_mb {
        if value < memory.0 || value > memory.1 {
            errors.push(format!(
                "Memory must be between {} and {} MB",
                memory.0, memory.1
            ));
        }
    }
    if let Some(value) = request.resources.disk_gb {
        if value < disk.0 || value > disk.1 {
            errors.push(format!(
                "Disk must be between {} and {} GB",
                disk.0, disk.1
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceSpec;
    use crate::storage::settings::default_frameworks;

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            name: "demo-app".to_string(),
            kind: DeploymentKind::Lxc,
            framework: "flask".to_string(),
            repo_url: "https://github.com/acme/demo".to_string(),
            resources: ResourceSpec::default(),
            env_vars: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        let errors = validate_request(&request(), &default_frameworks());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn bad_name_and_framework_are_both_reported() {
        let mut req = request();
        req.name = "a!".to_string();
        req.framework = "rails".to_string();

        let errors = validate_request(&req, &default_frameworks());
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn repo_url_must_point_at_github() {
        let mut req = request();
        for bad in [
            "notaurl",
            "ftp://github.com/acme/demo",
            "https://gitlab.com/acme/demo",
            "https://github.com/acme",
            "https://github.com/acme/demo/tree/main",
        ] {
            req.repo_url = bad.to_string();
            let errors = validate_request(&req, &default_frameworks());
            assert_eq!(errors.len(), 1, "expected rejection for {bad}");
        }

        req.repo_url = "https://github.com/acme/demo.git".to_string();
        assert!(validate_request(&req, &default_frameworks()).is_empty());
    }

    #[test]
    fn resource_bounds_depend_on_kind() {
        let mut req = request();
        req.resources.cores = Some(12);

        // 12 cores is too many for a container
        assert_eq!(validate_request(&req, &default_frameworks()).len(), 1);

        req.kind = DeploymentKind::Vm;
        assert!(validate_request(&req, &default_frameworks()).is_empty());

        req.resources.memory_mb = Some(128);
        assert_eq!(validate_request(&req, &default_frameworks()).len(), 1);
    }
}
