//! Command line arguments.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use incert_core::config::{
    CertificateSource, MergePolicy, Ownership, RewriteConfig, RunConfig, DEFAULT_CERT_MODE,
    DEFAULT_CERT_PATH, DEFAULT_MAX_INDEX_DEPTH,
};
use incert_core::error::Result;

/// Inject CA certificates into a container image and push the result.
#[derive(Parser, Debug)]
#[command(name = "incert", version, about)]
#[command(group(
    ArgGroup::new("certificates")
        .required(true)
        .args(["ca_certs_file", "ca_certs_image_url"])
))]
pub struct Cli {
    /// Image or image index to add the certificates to
    #[arg(long)]
    pub image_url: String,

    /// Where to push the rewritten image (tag, not digest)
    #[arg(long)]
    pub dest_image_url: String,

    /// Local PEM file with the certificates to add
    #[arg(long)]
    pub ca_certs_file: Option<PathBuf>,

    /// Image to read the certificates from, at --image-cert-path
    #[arg(long)]
    pub ca_certs_image_url: Option<String>,

    /// Rewrite only this platform of an index (os/arch[/variant])
    #[arg(long)]
    pub platform: Option<String>,

    /// Path of the certificate bundle inside the image
    #[arg(long, default_value = DEFAULT_CERT_PATH)]
    pub image_cert_path: String,

    /// Owner user ID of the rewritten bundle
    #[arg(long, default_value_t = 0)]
    pub owner_user_id: u64,

    /// Owner group ID of the rewritten bundle
    #[arg(long, default_value_t = 0)]
    pub owner_group_id: u64,

    /// Also write the final bundle to this local file
    #[arg(long)]
    pub output_certs_path: Option<PathBuf>,

    /// Replace the bundle instead of appending to it
    #[arg(long)]
    pub replace_certs: bool,

    /// Registry reachable over plain HTTP, can be repeated
    #[arg(long = "insecure-registry", value_name = "HOST")]
    pub insecure_registries: Vec<String>,

    /// Maximum image index nesting
    #[arg(long, default_value_t = DEFAULT_MAX_INDEX_DEPTH)]
    pub max_index_depth: usize,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn into_run_config(self) -> Result<RunConfig> {
        let certificates =
            CertificateSource::from_options(self.ca_certs_file, self.ca_certs_image_url)?;
        let policy = if self.replace_certs {
            MergePolicy::Replace
        } else {
            MergePolicy::Append
        };

        let config = RunConfig {
            source: self.image_url,
            destination: self.dest_image_url,
            certificates,
            platform: self.platform,
            output_certs: self.output_certs_path,
            rewrite: RewriteConfig {
                cert_path: self.image_cert_path,
                mode: DEFAULT_CERT_MODE,
                owner: Ownership {
                    uid: self.owner_user_id,
                    gid: self.owner_group_id,
                },
                policy,
                max_index_depth: self.max_index_depth,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incert_core::error::IncertError;

    fn parse(extra: &[&str]) -> std::result::Result<Cli, clap::Error> {
        let mut argv = vec![
            "incert",
            "--image-url",
            "alpine:3.20",
            "--dest-image-url",
            "ghcr.io/org/alpine:3.20-certs",
        ];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--ca-certs-file", "corp.pem"]).unwrap();
        assert_eq!(cli.image_cert_path, "/etc/ssl/certs/ca-certificates.crt");
        assert_eq!(cli.owner_user_id, 0);
        assert_eq!(cli.owner_group_id, 0);
        assert!(!cli.replace_certs);
        assert!(!cli.log_json);
        assert!(cli.platform.is_none());
        assert!(cli.insecure_registries.is_empty());
        assert_eq!(cli.max_index_depth, 16);
    }

    #[test]
    fn test_certificate_source_required() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_certificate_sources_conflict() {
        let err = parse(&["--ca-certs-file", "corp.pem", "--ca-certs-image-url", "ca:latest"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_destination_required() {
        let err = Cli::try_parse_from([
            "incert",
            "--image-url",
            "alpine",
            "--ca-certs-file",
            "corp.pem",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_into_run_config() {
        let cli = parse(&[
            "--ca-certs-image-url",
            "registry.local/ca:1",
            "--platform",
            "linux/arm64/v8",
            "--image-cert-path",
            "/etc/pki/tls/certs/ca-bundle.crt",
            "--owner-user-id",
            "1000",
            "--owner-group-id",
            "100",
            "--output-certs-path",
            "out.pem",
            "--replace-certs",
            "--insecure-registry",
            "localhost:5000",
            "--insecure-registry",
            "registry.local",
        ])
        .unwrap();
        assert_eq!(cli.insecure_registries, vec!["localhost:5000", "registry.local"]);

        let config = cli.into_run_config().unwrap();
        assert_eq!(config.source, "alpine:3.20");
        assert_eq!(config.destination, "ghcr.io/org/alpine:3.20-certs");
        assert_eq!(
            config.certificates,
            CertificateSource::Image("registry.local/ca:1".to_string())
        );
        assert_eq!(config.platform.as_deref(), Some("linux/arm64/v8"));
        assert_eq!(config.output_certs, Some(PathBuf::from("out.pem")));
        assert_eq!(config.rewrite.cert_path, "/etc/pki/tls/certs/ca-bundle.crt");
        assert_eq!(config.rewrite.owner, Ownership { uid: 1000, gid: 100 });
        assert_eq!(config.rewrite.policy, MergePolicy::Replace);
        assert_eq!(config.rewrite.mode, 0o644);
    }

    #[test]
    fn test_into_run_config_rejects_relative_path() {
        let cli = parse(&["--ca-certs-file", "corp.pem", "--image-cert-path", "etc/ssl/cert.pem"])
            .unwrap();
        assert!(matches!(
            cli.into_run_config(),
            Err(IncertError::ConfigError(_))
        ));
    }

    #[test]
    fn test_invalid_owner_id() {
        assert!(parse(&["--ca-certs-file", "corp.pem", "--owner-user-id", "-1"]).is_err());
    }
}
