use crate::cli::provision::{report_failure, report_provisioned};
use crate::cli::{cancel_on_interrupt, orchestrator_or_die};
use crate::config::Config;
use crate::orchestrator::{
    AddRequest, ManageReport, ManageRequest, RestartOutcome, EXIT_RESTART_FAILURE, EXIT_SUCCESS,
};
use crate::{error, note, warn, AddArgs, ManageArgs};

fn report_manage(report: &ManageReport, strict_restart: bool) -> i32 {
    let head = match report.registry.head() {
        Some(head) => format!("\"{}\" ({})", head.name, head.backend),
        None => "none".to_string(),
    };

    println!("{}: done, default route is {}", report.operation, head);

    match &report.restart {
        RestartOutcome::Restarted(restarted) => {
            println!("restarted \"{}\"", restarted.service);

            EXIT_SUCCESS
        }
        RestartOutcome::Skipped { remedy } => {
            note!("restart skipped, run `{}` to apply the change", remedy);

            EXIT_SUCCESS
        }
        RestartOutcome::Failed(failure) => {
            let code = if strict_restart {
                error!("{}", failure);
                EXIT_RESTART_FAILURE
            } else {
                warn!("the registry was updated but {}", failure);
                EXIT_SUCCESS
            };

            note!("run `{}` to apply the change", failure.remedy);

            code
        }
    }
}

pub(crate) async fn manage_cmd(config: &Config, args: &ManageArgs) -> i32 {
    let orchestrator = orchestrator_or_die(config);

    let request = ManageRequest {
        name: args.name.clone(),
        backend_spec: args.backend_spec.clone(),
        force: args.force,
        no_restart: args.no_restart,
    };

    match orchestrator.manage(&request).await {
        Ok(report) => report_manage(&report, args.strict_restart),
        Err(err) => {
            error!("{}", err);
            err.exit_code()
        }
    }
}

pub(crate) async fn add_cmd(config: &Config, args: &AddArgs) -> i32 {
    let orchestrator = orchestrator_or_die(config);

    let request = AddRequest {
        identifier: args.identifier.clone(),
        name: args.name.clone(),
        skip_download: args.skip_download,
        force: args.force,
        no_restart: args.no_restart,
    };

    let cancel = cancel_on_interrupt();

    match orchestrator.add(&request, &cancel).await {
        Ok(report) => {
            if let (Some(provisioned), Some(verification)) = (&report.provisioned, &report.verification) {
                report_provisioned(provisioned, verification);
            }

            report_manage(&report.manage, args.strict_restart)
        }
        Err(err) => report_failure(&orchestrator, &request.identifier, &err),
    }
}
