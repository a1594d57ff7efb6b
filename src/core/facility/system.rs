//! Facilities for Linux system state: deb packages and systemd services.

use serde::Deserialize;
use serde_json::Value;

use super::BuildContext;
use crate::error::Result;
use crate::step::Step;
use crate::utils::command;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct DebPackagesParams {
    packages: OneOrMany,
}

pub struct InstallDebPackages {
    pub packages: Vec<String>,
}

pub(super) fn build_install_deb_packages(
    entry: &Value,
    ctx: &BuildContext,
) -> Result<Box<dyn Step>> {
    let params: DebPackagesParams = ctx.params(entry)?;
    let packages = match params.packages {
        OneOrMany::One(p) => vec![p],
        OneOrMany::Many(ps) => ps,
    };
    Ok(Box::new(InstallDebPackages { packages }))
}

impl Step for InstallDebPackages {
    fn name(&self) -> &str {
        "InstallDebPackages"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        command::run("apt-get", &["update", "-y"])?;

        let mut args = vec!["install", "-y"];
        args.extend(self.packages.iter().map(String::as_str));
        command::run("apt-get", &args)?;
        Ok(())
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!(
            "apt-get update -y && apt-get install -y {}",
            self.packages.join(" ")
        )]
    }
}

#[derive(Deserialize)]
struct ServiceParams {
    service: String,
}

pub struct RestartSystemdService {
    pub service: String,
}

pub(super) fn build_restart_systemd_service(
    entry: &Value,
    ctx: &BuildContext,
) -> Result<Box<dyn Step>> {
    let params: ServiceParams = ctx.params(entry)?;
    Ok(Box::new(RestartSystemdService {
        service: params.service,
    }))
}

impl Step for RestartSystemdService {
    fn name(&self) -> &str {
        "RestartSystemdService"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        // A masked unit can't be started; unmask failure is not fatal.
        let unmask = command::capture("systemctl", &["unmask", self.service.as_str()]);
        if !unmask.success {
            log::debug!("systemctl unmask {}: {}", self.service, unmask.stderr.trim());
        }
        command::run("systemctl", &["restart", self.service.as_str()])?;
        Ok(())
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!(
            "systemctl unmask {} && systemctl restart {}",
            self.service, self.service
        )]
    }
}
