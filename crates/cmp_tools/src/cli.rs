#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use cmp_engines::clock::SystemClock;
use cmp_engines::ComplaintPortal;
use cmp_kernel_contracts::complaint::{
    Complaint, ComplaintFields, ComplaintFilter, ComplaintId, ComplaintStatus,
};
use cmp_kernel_contracts::directory::{PasswordCredential, Principal, Role, User, UserId};
use cmp_kernel_contracts::CmpError;
use cmp_storage::store::JsonFileStore;
use serde_json::json;

use crate::config::PortalConfig;

pub const ENV_PASSWORD: &str = "CMP_PASSWORD";
pub const ENV_NEW_PASSWORD: &str = "CMP_NEW_PASSWORD";

#[derive(Parser, Debug)]
#[command(
    name = "cmp",
    version,
    about = "Complaint management portal",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Store file (default: $XDG_CONFIG_HOME/cmp/store.json).
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Email of the acting account.
    #[arg(long = "as", global = true, value_name = "EMAIL")]
    pub as_email: Option<String>,

    /// Role to sign in under.
    #[arg(long, global = true, value_name = "ROLE", value_parser = parse_role)]
    pub role: Option<Role>,

    /// Machine-readable JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a user account.
    Register(RegisterArgs),

    /// Manage staff accounts (admin).
    #[command(subcommand)]
    Staff(StaffCommand),

    /// File a new complaint (user).
    Submit(SubmitArgs),

    /// Assign a complaint to a staff member (admin).
    Assign(AssignArgs),

    /// Set any status (admin).
    SetStatus(SetStatusArgs),

    /// Move an assigned complaint forward (staff).
    Advance(AdvanceArgs),

    /// Close your own complaint (user).
    Close(CloseArgs),

    /// Append a remark.
    Remark(RemarkArgs),

    /// Show one complaint with its history and remarks.
    Show(ComplaintRef),

    /// List all complaints (admin).
    #[command(alias = "ls")]
    List(ListArgs),

    /// List complaints you filed (user).
    Mine(MineArgs),

    /// List complaints assigned to you (staff).
    Assigned,

    /// Complaint counts by status and category (admin).
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum StaffCommand {
    /// Create a staff account. Its password comes from CMP_NEW_PASSWORD or a prompt.
    Add(NewAccountArgs),
    /// Remove a staff account.
    Remove {
        staff_id: String,
    },
    /// List staff accounts.
    List,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub account: NewAccountArgs,
}

#[derive(Args, Debug)]
pub struct NewAccountArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub email: String,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: String,
    #[arg(long)]
    pub category: String,
    #[arg(long)]
    pub location: String,
    /// YYYY-MM-DD
    #[arg(long, value_parser = parse_date)]
    pub incident_date: NaiveDate,
}

#[derive(Args, Debug)]
pub struct ComplaintRef {
    pub complaint_id: String,
}

#[derive(Args, Debug)]
pub struct AssignArgs {
    pub complaint_id: String,
    pub staff_id: String,
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct SetStatusArgs {
    pub complaint_id: String,
    #[arg(value_parser = parse_status)]
    pub status: ComplaintStatus,
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct AdvanceArgs {
    pub complaint_id: String,
    #[arg(value_parser = parse_status)]
    pub status: ComplaintStatus,
}

#[derive(Args, Debug)]
pub struct CloseArgs {
    pub complaint_id: String,
    #[arg(long)]
    pub remark: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemarkArgs {
    pub complaint_id: String,
    pub text: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, value_parser = parse_status)]
    pub status: Option<ComplaintStatus>,
    /// Case-insensitive substring of the category.
    #[arg(long)]
    pub category: Option<String>,
    /// Created on or after this day (YYYY-MM-DD, UTC).
    #[arg(long, value_parser = parse_date)]
    pub from: Option<NaiveDate>,
    /// Created on or before this day (YYYY-MM-DD, UTC).
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct MineArgs {
    /// Matches title, category, location and description.
    #[arg(long)]
    pub search: Option<String>,
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw)
        .ok_or_else(|| format!("unknown role '{raw}'. expected one of: admin, staff, user"))
}

fn parse_status(raw: &str) -> Result<ComplaintStatus, String> {
    ComplaintStatus::parse(raw).ok_or_else(|| {
        format!("unknown status '{raw}'. expected one of: pending, in-progress, resolved")
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{raw}' (expected YYYY-MM-DD): {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretPurpose {
    /// The acting account's password.
    SignIn,
    /// Password for an account being created on someone else's behalf.
    NewAccount,
}

/// Where passwords come from. The binary reads env vars or prompts; tests hand them in.
pub trait SecretSource {
    fn secret(&self, purpose: SecretPurpose) -> Result<PasswordCredential, String>;
}

/// Builds the portal over the configured file store, seeding default accounts when asked.
pub fn open_portal(config: &PortalConfig) -> Result<ComplaintPortal, String> {
    let store = JsonFileStore::open(&config.store_path)
        .map_err(|e| format!("failed to open store: {e}"))?;
    let portal = ComplaintPortal::new(
        Arc::new(store),
        config.credential_scheme.build(),
        Arc::new(SystemClock),
    );
    if config.seed_defaults {
        portal.directory().seed_defaults().map_err(describe)?;
    }
    Ok(portal)
}

fn describe(e: CmpError) -> String {
    e.to_string()
}

fn complaint_id(raw: &str) -> Result<ComplaintId, String> {
    ComplaintId::new(raw.trim()).map_err(|_| format!("invalid complaint id '{raw}'"))
}

fn user_id(raw: &str) -> Result<UserId, String> {
    UserId::new(raw.trim()).map_err(|_| format!("invalid user id '{raw}'"))
}

fn sign_in(
    cli: &Cli,
    portal: &ComplaintPortal,
    secrets: &dyn SecretSource,
) -> Result<Principal, String> {
    let email = cli
        .as_email
        .as_deref()
        .ok_or_else(|| "missing --as <email>".to_string())?;
    let role = cli.role.ok_or_else(|| "missing --role <admin|staff|user>".to_string())?;
    let password = secrets.secret(SecretPurpose::SignIn)?;
    let user = portal
        .directory()
        .authenticate(email, &password, role)
        .map_err(describe)?;
    Ok(user.principal())
}

fn require_role(actor: &Principal, role: Role) -> Result<(), String> {
    if actor.role == role {
        Ok(())
    } else {
        Err(describe(CmpError::forbidden("command not available for this role")))
    }
}

/// Users see their own complaints, staff the ones assigned to them, admin everything.
fn visible_to(actor: &Principal, c: &Complaint) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Staff => c.is_assigned_to(&actor.id),
        Role::User => c.created_by == actor.id,
    }
}

pub fn execute(
    cli: &Cli,
    portal: &ComplaintPortal,
    secrets: &dyn SecretSource,
) -> Result<String, String> {
    match &cli.command {
        Commands::Register(args) => {
            let password = secrets.secret(SecretPurpose::SignIn)?;
            let user = portal
                .directory()
                .register(&args.account.name, &args.account.email, &password, Role::User)
                .map_err(describe)?;
            Ok(render_user(cli.json, &user))
        }
        Commands::Staff(cmd) => {
            let actor = sign_in(cli, portal, secrets)?;
            match cmd {
                StaffCommand::Add(args) => {
                    let password = secrets.secret(SecretPurpose::NewAccount)?;
                    let user = portal
                        .directory()
                        .add_staff(&actor, &args.name, &args.email, &password)
                        .map_err(describe)?;
                    Ok(render_user(cli.json, &user))
                }
                StaffCommand::Remove { staff_id } => {
                    portal
                        .directory()
                        .remove_staff(&actor, &user_id(staff_id)?)
                        .map_err(describe)?;
                    Ok("OK".to_string())
                }
                StaffCommand::List => {
                    require_role(&actor, Role::Admin)?;
                    let staff = portal.directory().list_staff().map_err(describe)?;
                    Ok(render_users(cli.json, &staff))
                }
            }
        }
        Commands::Submit(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let fields = ComplaintFields {
                title: args.title.clone(),
                description: args.description.clone(),
                category: args.category.clone(),
                location: args.location.clone(),
                incident_date: Some(args.incident_date),
            };
            let c = portal.engine().submit(&actor, fields).map_err(describe)?;
            render_complaint(cli.json, &c)
        }
        Commands::Assign(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let c = portal
                .engine()
                .assign(
                    &actor,
                    &complaint_id(&args.complaint_id)?,
                    &user_id(&args.staff_id)?,
                    args.note.as_deref(),
                )
                .map_err(describe)?;
            render_complaint(cli.json, &c)
        }
        Commands::SetStatus(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let c = portal
                .engine()
                .set_status(
                    &actor,
                    &complaint_id(&args.complaint_id)?,
                    args.status,
                    args.note.as_deref(),
                )
                .map_err(describe)?;
            render_complaint(cli.json, &c)
        }
        Commands::Advance(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let c = portal
                .engine()
                .staff_advance(&actor, &complaint_id(&args.complaint_id)?, args.status)
                .map_err(describe)?;
            render_complaint(cli.json, &c)
        }
        Commands::Close(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let c = portal
                .engine()
                .user_close(&actor, &complaint_id(&args.complaint_id)?, args.remark.as_deref())
                .map_err(describe)?;
            render_complaint(cli.json, &c)
        }
        Commands::Remark(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let c = portal
                .engine()
                .add_remark(&actor, &complaint_id(&args.complaint_id)?, &args.text)
                .map_err(describe)?;
            render_complaint(cli.json, &c)
        }
        Commands::Show(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            let id = complaint_id(&args.complaint_id)?;
            let c = portal.queries().get(&id).map_err(describe)?;
            if !visible_to(&actor, &c) {
                return Err(describe(CmpError::not_found("complaint", id.as_str())));
            }
            render_complaint(cli.json, &c)
        }
        Commands::List(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            require_role(&actor, Role::Admin)?;
            let filter = ComplaintFilter {
                status: args.status,
                category_substring: args.category.clone(),
                created_after: args.from,
                created_before: args.to,
            };
            let all = portal.queries().list_all(&filter).map_err(describe)?;
            render_list(cli.json, &all)
        }
        Commands::Mine(args) => {
            let actor = sign_in(cli, portal, secrets)?;
            require_role(&actor, Role::User)?;
            let mine = portal
                .queries()
                .search_for_creator(&actor.id, args.search.as_deref().unwrap_or(""))
                .map_err(describe)?;
            render_list(cli.json, &mine)
        }
        Commands::Assigned => {
            let actor = sign_in(cli, portal, secrets)?;
            require_role(&actor, Role::Staff)?;
            let theirs = portal
                .queries()
                .list_for_assignee(&actor.id)
                .map_err(describe)?;
            render_list(cli.json, &theirs)
        }
        Commands::Stats => {
            let actor = sign_in(cli, portal, secrets)?;
            require_role(&actor, Role::Admin)?;
            let by_status = portal.queries().counts_by_status().map_err(describe)?;
            let by_category = portal.queries().counts_by_category().map_err(describe)?;
            if cli.json {
                let body = json!({ "by_status": by_status, "by_category": by_category });
                return Ok(body.to_string());
            }
            let mut out = format!(
                "total: {}\npending: {}\nin progress: {}\nresolved: {}",
                by_status.total, by_status.pending, by_status.in_progress, by_status.resolved
            );
            for (category, count) in &by_category {
                let _ = write!(out, "\n{category}: {count}");
            }
            Ok(out)
        }
    }
}

fn user_json(u: &User) -> serde_json::Value {
    json!({ "id": u.id, "name": u.name, "email": u.email, "role": u.role })
}

fn render_user(as_json: bool, u: &User) -> String {
    if as_json {
        return user_json(u).to_string();
    }
    format!("{}  {}  {}  {}", u.id, u.role, u.email, u.name)
}

fn render_users(as_json: bool, users: &[User]) -> String {
    if as_json {
        return serde_json::Value::Array(users.iter().map(user_json).collect()).to_string();
    }
    users
        .iter()
        .map(|u| render_user(false, u))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summary_line(c: &Complaint) -> String {
    format!(
        "{}  {:<11}  {}  {}  {}",
        c.id,
        c.status,
        c.created_at.format("%Y-%m-%d"),
        c.category,
        c.title
    )
}

fn render_list(as_json: bool, complaints: &[Complaint]) -> Result<String, String> {
    if as_json {
        return serde_json::to_string(complaints).map_err(|e| e.to_string());
    }
    Ok(complaints
        .iter()
        .map(summary_line)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn render_complaint(as_json: bool, c: &Complaint) -> Result<String, String> {
    if as_json {
        return serde_json::to_string(c).map_err(|e| e.to_string());
    }
    let mut out = summary_line(c);
    let _ = write!(
        out,
        "\n  location: {}\n  incident: {}\n  filed by: {}",
        c.location, c.incident_date, c.created_by_name
    );
    if let Some(name) = &c.assigned_to_name {
        let _ = write!(out, "\n  assigned: {name}");
    }
    let _ = write!(out, "\n  {}", c.description);
    out.push_str("\n  history:");
    for h in &c.history {
        let _ = write!(
            out,
            "\n    {}  {}",
            h.occurred_at.format("%Y-%m-%d %H:%M"),
            h.status.as_str()
        );
        if let Some(note) = &h.note {
            let _ = write!(out, "  {note}");
        }
    }
    if !c.remarks.is_empty() {
        out.push_str("\n  remarks:");
        for r in &c.remarks {
            let _ = write!(
                out,
                "\n    {}  {}: {}",
                r.occurred_at.format("%Y-%m-%d %H:%M"),
                r.author_name,
                r.text
            );
        }
    }
    Ok(out)
}
