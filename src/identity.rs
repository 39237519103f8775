//! Employee numbers of system administrators.
//!
//! Every member of the system administrators group carries an employee
//! number that no other member has. Numbers are drawn at random below
//! [`EMPLOYEE_NUMBER_LIMIT`], which keeps them within the token size a
//! downstream consumer accepts. Freed numbers are not handed out again on
//! purpose, a new one is always drawn.
use std::collections::HashSet;

use rand::Rng;

use crate::{
	config::Config,
	directory::Directory,
	error::Error,
	listing,
	model::Subtree,
};

/// Employee numbers are below this value
pub const EMPLOYEE_NUMBER_LIMIT: u16 = 32767;

/// Draw numbers from `rng` until one is found that is not `taken`.
pub fn next_employee_number<R: Rng + ?Sized>(
	taken: &HashSet<u16>,
	rng: &mut R,
) -> Result<u16, Error> {
	let available = usize::from(EMPLOYEE_NUMBER_LIMIT)
		- taken.iter().filter(|&&number| number < EMPLOYEE_NUMBER_LIMIT).count();
	if available == 0 {
		return Err(Error::EmployeeNumbersExhausted);
	}
	loop {
		let number = rng.gen_range(0..EMPLOYEE_NUMBER_LIMIT);
		if !taken.contains(&number) {
			return Ok(number);
		}
	}
}

/// The employee numbers held by system administrators other than
/// `excluding_id`.
pub async fn taken_employee_numbers<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	excluding_id: &str,
) -> Result<HashSet<u16>, Error> {
	let users = listing::load_entries(dir, config, Subtree::WebUiUsers).await?;
	Ok(users
		.into_iter()
		.filter(|user| user.id != excluding_id)
		.filter(|user| user.groups.contains(&config.admin.system_group))
		.filter_map(|user| user.employee_number)
		.collect())
}

/// Pick an employee number for the webui user `id` that no other system
/// administrator has.
pub async fn assign_employee_number<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	id: &str,
) -> Result<u16, Error> {
	let taken = taken_employee_numbers(dir, config, id).await?;
	let number = next_employee_number(&taken, &mut rand::thread_rng())?;
	Ok(number)
}
