use serde::{Deserialize, Serialize};

use tradepost_core::{DomainError, DomainResult, Entity, Money, UserId};

/// Validated registration input for a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub address: Option<String>,
}

impl Registration {
    /// Normalize and validate the registration input.
    ///
    /// Email is trimmed and lowercased so uniqueness checks are
    /// case-insensitive. Uniqueness itself is enforced by storage.
    pub fn normalized(self) -> DomainResult<Self> {
        let email = self.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            email,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            address: self.address,
        })
    }
}

/// Profile fields a user may change after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub address: Option<String>,
    pub bio: Option<String>,
}

/// A marketplace account: identity plus a non-negative cent balance.
///
/// # Invariants
/// - `balance` never goes negative; every mutation is checked.
/// - Email is stored normalized (trimmed, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: UserId,
    email: String,
    first_name: String,
    last_name: String,
    address: Option<String>,
    bio: Option<String>,
    balance: Money,
    password_hash: String,
}

impl Account {
    /// Create a freshly registered account with a zero balance.
    ///
    /// `password_hash` must already be an argon2 hash (see
    /// [`crate::password::hash_password`]); plain passwords never reach the
    /// entity.
    pub fn register(
        id: UserId,
        registration: Registration,
        password_hash: String,
    ) -> DomainResult<Self> {
        let reg = registration.normalized()?;
        if password_hash.is_empty() {
            return Err(DomainError::validation("password hash cannot be empty"));
        }
        Ok(Self {
            id,
            email: reg.email,
            first_name: reg.first_name,
            last_name: reg.last_name,
            address: reg.address,
            bio: None,
            balance: Money::ZERO,
            password_hash,
        })
    }

    /// Rehydrate an account from stored fields. Storage is trusted to hold
    /// values that already passed validation.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: UserId,
        email: String,
        first_name: String,
        last_name: String,
        address: Option<String>,
        bio: Option<String>,
        balance: Money,
        password_hash: String,
    ) -> Self {
        Self {
            id,
            email,
            first_name,
            last_name,
            address,
            bio,
            balance,
            password_hash,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn bio(&self) -> Option<&str> {
        self.bio.as_deref()
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn can_afford(&self, total: Money) -> bool {
        self.balance >= total
    }

    /// Apply a profile update. Email uniqueness across accounts is enforced
    /// by storage; shape validation happens here.
    pub fn update_profile(&mut self, update: ProfileUpdate) -> DomainResult<()> {
        let email = update.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if update.first_name.trim().is_empty() || update.last_name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        self.email = email;
        self.first_name = update.first_name.trim().to_string();
        self.last_name = update.last_name.trim().to_string();
        self.address = update.address;
        self.bio = update.bio;
        Ok(())
    }

    pub fn set_password_hash(&mut self, password_hash: String) -> DomainResult<()> {
        if password_hash.is_empty() {
            return Err(DomainError::validation("password hash cannot be empty"));
        }
        self.password_hash = password_hash;
        Ok(())
    }

    /// Add to the balance. Returns the new balance.
    pub fn credit(&mut self, amount: Money) -> DomainResult<Money> {
        self.balance = self.balance.checked_add(amount)?;
        Ok(self.balance)
    }

    /// Subtract from the balance. Fails if the balance would go negative;
    /// callers that want a soft outcome check [`Account::can_afford`] first.
    pub fn debit(&mut self, amount: Money) -> DomainResult<Money> {
        if amount > self.balance {
            return Err(DomainError::invariant("insufficient balance"));
        }
        self.balance = self.balance.checked_sub(amount)?;
        Ok(self.balance)
    }

    /// User-initiated deposit. Zero amounts are rejected.
    pub fn top_up(&mut self, amount: Money) -> DomainResult<Money> {
        if amount.is_zero() {
            return Err(DomainError::validation("amount must be positive"));
        }
        self.credit(amount)
    }

    /// User-initiated withdrawal. The sufficiency check lives here, inside
    /// the mutation, so it is atomic with the debit.
    pub fn withdraw(&mut self, amount: Money) -> DomainResult<Money> {
        if amount.is_zero() {
            return Err(DomainError::validation("amount must be positive"));
        }
        self.debit(amount)
    }
}

impl Entity for Account {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            first_name: "Alice".to_string(),
            last_name: "Smith".to_string(),
            address: Some("1 Main St".to_string()),
        }
    }

    fn account() -> Account {
        Account::register(UserId::new(), registration("alice@example.com"), "h".into()).unwrap()
    }

    #[test]
    fn register_normalizes_email() {
        let acct = Account::register(
            UserId::new(),
            registration("  Alice@Example.COM "),
            "hash".into(),
        )
        .unwrap();
        assert_eq!(acct.email(), "alice@example.com");
        assert_eq!(acct.balance(), Money::ZERO);
    }

    #[test]
    fn register_rejects_invalid_email() {
        let err =
            Account::register(UserId::new(), registration("not-an-email"), "hash".into())
                .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn debit_beyond_balance_is_rejected() {
        let mut acct = account();
        acct.credit(Money::from_cents(1000).unwrap()).unwrap();

        let err = acct.debit(Money::from_cents(1001).unwrap()).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("insufficient") => {}
            other => panic!("expected insufficient balance, got {other:?}"),
        }
        assert_eq!(acct.balance(), Money::from_cents(1000).unwrap());
    }

    #[test]
    fn withdraw_checks_sufficiency_inside_the_mutation() {
        let mut acct = account();
        acct.top_up(Money::from_cents(500).unwrap()).unwrap();

        assert!(acct.withdraw(Money::from_cents(600).unwrap()).is_err());
        assert_eq!(acct.balance(), Money::from_cents(500).unwrap());

        let remaining = acct.withdraw(Money::from_cents(500).unwrap()).unwrap();
        assert_eq!(remaining, Money::ZERO);
    }

    #[test]
    fn zero_top_up_is_rejected() {
        let mut acct = account();
        assert!(acct.top_up(Money::ZERO).is_err());
    }

    #[test]
    fn update_profile_revalidates_email() {
        let mut acct = account();
        let err = acct
            .update_profile(ProfileUpdate {
                email: "broken".to_string(),
                first_name: "Alice".to_string(),
                last_name: "Smith".to_string(),
                address: None,
                bio: None,
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(acct.email(), "alice@example.com");
    }

    proptest! {
        /// Property: any sequence of credits followed by the same debits
        /// returns the balance to its starting point.
        #[test]
        fn credit_then_debit_conserves_balance(
            amounts in prop::collection::vec(1i64..1_000_000i64, 1..10)
        ) {
            let mut acct = account();
            for cents in &amounts {
                acct.credit(Money::from_cents(*cents).unwrap()).unwrap();
            }
            for cents in &amounts {
                acct.debit(Money::from_cents(*cents).unwrap()).unwrap();
            }
            prop_assert_eq!(acct.balance(), Money::ZERO);
        }
    }
}
