//! Command parsing and execution.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use courier_core::models::{NewOrder, Order, ProfileUpdate, RegisterRequest};
use courier_core::{ApiClient, KeyValueStore, OrderFilter, User};
use tracing::debug;

/// Environment variable consulted before prompting for a password
const PASSWORD_ENV: &str = "COURIER_PASSWORD";

#[derive(Debug)]
pub enum Command {
    Login { email: Option<String> },
    Register { name: String, email: String },
    Logout,
    Status,
    Profile,
    UpdateProfile(ProfileUpdate),
    Orders(OrderFilter),
    Order(i64),
    CreateOrder(NewOrder),
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let command = match args.next() {
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("login") => Command::Login {
                email: args.next().map(str::to_string),
            },
            Some("register") => {
                let name = args.next().context("register needs a name")?;
                let email = args.next().context("register needs an email")?;
                Command::Register {
                    name: name.to_string(),
                    email: email.to_string(),
                }
            }
            Some("logout") => Command::Logout,
            Some("status") => Command::Status,
            Some("profile") => {
                let mut update = ProfileUpdate::default();
                while let Some(flag) = args.next() {
                    let value = args
                        .next()
                        .with_context(|| format!("{} needs a value", flag))?;
                    match flag {
                        "--name" => update.name = Some(value.to_string()),
                        "--email" => update.email = Some(value.to_string()),
                        other => bail!("unknown profile option '{}'", other),
                    }
                }
                if update.is_empty() {
                    Command::Profile
                } else {
                    Command::UpdateProfile(update)
                }
            }
            Some("orders") => {
                let mut filter = OrderFilter::default();
                while let Some(flag) = args.next() {
                    let value = args
                        .next()
                        .with_context(|| format!("{} needs a value", flag))?;
                    match flag {
                        "--status" => filter.status = Some(value.to_string()),
                        "--search" => filter.query = value.to_string(),
                        other => bail!("unknown orders option '{}'", other),
                    }
                }
                Command::Orders(filter)
            }
            Some("order") => match args.next() {
                Some("create") => {
                    let pickup = args.next().context("order create needs a pickup address")?;
                    let delivery = args
                        .next()
                        .context("order create needs a delivery address")?;
                    let mut order = NewOrder::new(pickup, delivery);
                    while let Some(flag) = args.next() {
                        let value = args
                            .next()
                            .with_context(|| format!("{} needs a value", flag))?;
                        match flag {
                            "--weight" => {
                                order.weight = Some(
                                    value
                                        .parse()
                                        .with_context(|| format!("invalid weight '{}'", value))?,
                                )
                            }
                            "--size" => order.size = Some(value.to_string()),
                            other => bail!("unknown order option '{}'", other),
                        }
                    }
                    Command::CreateOrder(order)
                }
                Some(id) => Command::Order(
                    id.parse()
                        .with_context(|| format!("invalid order id '{}'", id))?,
                ),
                None => bail!("order needs an id or 'create'"),
            },
            Some(other) => bail!("unknown command '{}'", other),
        };
        Ok(command)
    }

    /// Whether the command only makes sense with a session
    fn needs_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::Register { .. } | Command::Logout | Command::Status | Command::Help
        )
    }
}

pub fn print_usage() {
    println!(
        "Usage: courier <command>

Commands:
  login [email]                         Log in (password from {} or prompt)
  register <name> <email>               Create an account
  logout                                Forget the saved session
  status                                Show session, profile and order count
  profile [--name N] [--email E]        Show or update your profile
  orders [--status S] [--search ID]     List your orders
  order <id>                            Show one order
  order create <pickup> <delivery> [--weight KG] [--size S]
                                        Book a delivery",
        PASSWORD_ENV
    );
}

pub async fn run<S: KeyValueStore>(command: Command, api: &ApiClient<S>) -> Result<()> {
    let session = api.session();
    if command.needs_session() && !session.is_authenticated() {
        bail!("Not logged in. Run `courier login` first.");
    }
    debug!(?command, "Running command");

    match command {
        Command::Help => print_usage(),
        Command::Login { email } => {
            let email = match email {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = read_password("Password: ")?;
            let user = api.login(&email, &password).await?;
            println!("Login successful. Welcome, {}.", user.display_name());
        }
        Command::Register { name, email } => {
            let password = read_password("Password: ")?;
            let confirmation = read_password("Confirm password: ")?;
            if password != confirmation {
                bail!("Passwords do not match");
            }
            let request = RegisterRequest::new(name, email, password)
                .with_field("password_confirmation", confirmation);
            let response = api.register(&request).await?;
            println!(
                "{}",
                response
                    .message
                    .as_deref()
                    .unwrap_or("Registered successfully.")
            );
            println!("You can now run `courier login`.");
        }
        Command::Logout => {
            api.logout().await?;
            println!("Logged out.");
        }
        Command::Status => {
            if !session.is_authenticated() {
                println!("Not logged in.");
                return Ok(());
            }
            let (profile, orders) =
                futures::future::join(api.refresh_profile(), api.fetch_orders()).await;
            let user = profile?;
            let orders = orders?;
            print_user(&user);
            println!("Orders:  {}", orders.len());
        }
        Command::Profile => {
            let user = api.refresh_profile().await?;
            print_user(&user);
        }
        Command::UpdateProfile(update) => {
            let user = api.update_profile(&update).await?;
            println!("Profile updated successfully.");
            print_user(&user);
        }
        Command::Orders(filter) => {
            let orders = api.fetch_orders().await?;
            let shown = filter.apply(&orders);
            if shown.is_empty() {
                println!("No orders found.");
            }
            for order in shown {
                print_order_line(order);
            }
        }
        Command::Order(id) => {
            let order = api.fetch_order(id).await?;
            println!("{}", serde_json::to_string_pretty(&order)?);
        }
        Command::CreateOrder(order) => {
            let created = api.create_order(&order).await?;
            println!("Order created successfully. Tracking number: {}", created.id);
        }
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("Name:    {}", user.name);
    println!("Email:   {}", user.email);
}

fn print_order_line(order: &Order) {
    let details = match (&order.weight, &order.size) {
        (Some(weight), Some(size)) => format!(" | Weight: {}kg | Size: {}", weight, size),
        (Some(weight), None) => format!(" | Weight: {}kg", weight),
        (None, Some(size)) => format!(" | Size: {}", size),
        (None, None) => String::new(),
    };
    println!(
        "#{:<6} {:<12} {}{}",
        order.id,
        order.status(),
        order.route(),
        details
    );
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{} is required", label.trim_end_matches(": "));
    }
    Ok(value)
}

fn read_password(label: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    let password = rpassword::prompt_password(label)?;
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}
