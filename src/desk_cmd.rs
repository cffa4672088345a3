//! `htriage helpdesk ...`: direct helpdesk calls for operators.

use anyhow::{bail, Result};

use crate::config::{Config, Secrets};
use crate::helpdesk::{Helpdesk, NewTicket, ZohoDesk};

fn connect(config: &Config) -> Result<ZohoDesk> {
    let credentials = Secrets::from_env().helpdesk_credentials()?;
    ZohoDesk::new(&config.helpdesk, credentials)
}

pub async fn run_departments(config: &Config) -> Result<()> {
    let desk = connect(config)?;
    let token = desk.refresh_token().await?;
    let departments = desk.list_departments(&token).await?;

    if departments.is_empty() {
        println!("No departments.");
        return Ok(());
    }
    println!("{:<24} NAME", "ID");
    for d in &departments {
        println!("{:<24} {}", d.id, d.name);
    }
    Ok(())
}

/// Create a ticket. Without `department_id` the first listed department
/// is used.
pub async fn run_create(
    config: &Config,
    subject: &str,
    description: &str,
    department_id: Option<String>,
    contact_id: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let desk = connect(config)?;
    let token = desk.refresh_token().await?;

    let department_id = match department_id {
        Some(id) => id,
        None => {
            let departments = desk.list_departments(&token).await?;
            match departments.into_iter().next() {
                Some(d) => {
                    println!("Using department {} ({})", d.name, d.id);
                    d.id
                }
                None => bail!("No departments found in the helpdesk"),
            }
        }
    };

    let ticket = NewTicket {
        subject: subject.to_string(),
        description: description.to_string(),
        department_id,
        contact_id,
        email,
    };
    desk.create_ticket(&token, &ticket).await?;
    println!("Created ticket: {}", subject);
    Ok(())
}
