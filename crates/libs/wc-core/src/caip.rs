//! CAIP-2 chain identifiers (`namespace:reference`) and CAIP-10 account
//! identifiers (`namespace:reference:address`).

use crate::error::ProtocolError;

const NAMESPACE_LEN: std::ops::RangeInclusive<usize> = 3..=8;
const REFERENCE_LEN: std::ops::RangeInclusive<usize> = 1..=32;
const ADDRESS_LEN: std::ops::RangeInclusive<usize> = 1..=128;

fn is_valid_namespace(value: &str) -> bool {
    NAMESPACE_LEN.contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_valid_reference(value: &str) -> bool {
    REFERENCE_LEN.contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn is_valid_address(value: &str) -> bool {
    ADDRESS_LEN.contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'%'))
}

pub fn is_valid_chain_id(value: &str) -> bool {
    match value.split_once(':') {
        Some((namespace, reference)) => {
            is_valid_namespace(namespace) && is_valid_reference(reference)
        }
        None => false,
    }
}

pub fn is_valid_account_id(value: &str) -> bool {
    let mut parts = value.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(namespace), Some(reference), Some(address)) => {
            is_valid_namespace(namespace)
                && is_valid_reference(reference)
                && is_valid_address(address)
        }
        _ => false,
    }
}

/// Splits a valid CAIP-10 account into its chain id and address.
pub fn split_account_id(value: &str) -> Option<(&str, &str)> {
    if !is_valid_account_id(value) {
        return None;
    }
    value.rsplit_once(':')
}

pub fn validate_accounts(accounts: &[String]) -> Result<(), ProtocolError> {
    match accounts.iter().find(|account| !is_valid_account_id(account)) {
        Some(bad) => Err(ProtocolError::InvalidAccount(bad.clone())),
        None => Ok(()),
    }
}
