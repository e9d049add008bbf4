//! Administrative subcommands operating directly on the stores.
//!
//! Accounts and follow edges are created out of band; the relay itself only
//! reads them. These commands are how an operator manages them.

use crate::store::{StoreError, Stores};

/// Administrative command.
#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Manage user accounts.
    #[command(subcommand)]
    User(UserCommand),

    /// Let FOLLOWER send messages and files to FOLLOWED.
    Follow {
        /// User who will be allowed to send.
        follower: String,
        /// User who will receive.
        followed: String,
    },

    /// Remove a follow edge. Removing a missing edge is not an error.
    Unfollow {
        /// User who follows.
        follower: String,
        /// User being followed.
        followed: String,
    },

    /// List the users FOLLOWER follows.
    Following {
        /// User whose follow list is printed.
        follower: String,
    },
}

/// `user` subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum UserCommand {
    /// Register a new user.
    Add {
        /// Unique username.
        username: String,
        /// Password, stored as given.
        password: String,
    },

    /// Check a username and password.
    Verify {
        /// Username to check.
        username: String,
        /// Password to check.
        password: String,
    },

    /// List registered users.
    List {
        /// Leave this user out of the list.
        #[arg(long)]
        excluding: Option<String>,
    },
}

/// Runs `command` against `stores` and returns the lines to print.
///
/// # Errors
///
/// Returns the [`StoreError`] of the failing store operation.
pub fn run(command: &Command, stores: &Stores) -> Result<Vec<String>, StoreError> {
    match command {
        Command::User(UserCommand::Add { username, password }) => {
            stores.users.register(username, password)?;
            Ok(vec![format!("registered {username}")])
        }
        Command::User(UserCommand::Verify { username, password }) => {
            stores.users.verify(username, password)?;
            Ok(vec![format!("{username} verified")])
        }
        Command::User(UserCommand::List { excluding }) => {
            stores.users.list_usernames(excluding.as_deref())
        }
        Command::Follow { follower, followed } => {
            stores.follows.follow(follower, followed)?;
            Ok(vec![format!("{follower} now follows {followed}")])
        }
        Command::Unfollow { follower, followed } => {
            stores.follows.unfollow(follower, followed)?;
            Ok(vec![format!("{follower} no longer follows {followed}")])
        }
        Command::Following { follower } => stores.follows.following(follower),
    }
}
