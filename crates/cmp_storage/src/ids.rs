#![forbid(unsafe_code)]

use cmp_kernel_contracts::complaint::{ComplaintId, COMPLAINT_ID_PREFIX};
use cmp_kernel_contracts::directory::{UserId, USER_ID_PREFIX};
use cmp_kernel_contracts::ContractViolation;
use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 7;

/// Attempts before an id allocation gives up on collisions.
pub const MAX_ID_ATTEMPTS: usize = 8;

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn new_user_id() -> Result<UserId, ContractViolation> {
    UserId::new(format!("{USER_ID_PREFIX}{}", random_suffix()))
}

pub fn new_complaint_id() -> Result<ComplaintId, ContractViolation> {
    ComplaintId::new(format!("{COMPLAINT_ID_PREFIX}{}", random_suffix()))
}
