// Source probes: side-effect-free reads of a watched source's current value

pub mod github;
pub mod image;

pub use github::GitHubClient;
pub use image::{ContainerRuntime, DockerCli, ImageDigestProbe};
