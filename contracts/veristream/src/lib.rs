#![no_std]

pub mod exp;
pub mod math;

use soroban_sdk::{
    contract, contractimpl, contracttype, symbol_short, token, Address, Env, String, Vec,
};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[soroban_sdk::contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    StreamNotFound = 1,
    ReportNotFound = 2,
    ReentrantCall = 3,
}

/// A deposit released to `recipient` at `rate_per_second` over
/// `[start_time, stop_time)`. Only `remaining_balance` mutates after
/// creation, and it only decreases.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stream {
    pub stream_id: u64,
    pub sender: Address,
    pub recipient: Address,
    pub token: Address,
    pub deposit: i128,
    pub remaining_balance: i128,
    pub rate_per_second: i128,
    pub start_time: u64,
    pub stop_time: u64,
}

/// A claim funded by a reverse stream. `stream_id` is a snapshot taken at
/// filing time; the report is never updated when that stream is later
/// drained, cancelled or closed, and stays behind as a historical receipt.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Report {
    pub id: u64,
    pub reporter: Address,
    pub content: String,
    pub amount: i128,
    pub stream_id: u64,
    pub valid: bool,
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    Admin,                // Instance storage for the privileged owner.
    NextStreamId,         // Instance storage for the stream id counter.
    ReportCount,          // Instance storage for the report id counter.
    Guard,                // Instance storage for the reentrancy flag.
    Stream(u64),          // Persistent storage for individual stream records.
    Report(u64),          // Persistent storage for individual report records.
    UserReports(Address), // Persistent storage for per-reporter report ids.
}

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

fn get_admin(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .expect("contract not initialised: missing admin")
}

fn next_stream_id(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::NextStreamId)
        .unwrap_or(0u64)
}

fn allocate_stream_id(env: &Env) -> u64 {
    let id = next_stream_id(env);
    let next = id.checked_add(1).expect("stream id counter overflow");
    env.storage().instance().set(&DataKey::NextStreamId, &next);
    id
}

fn report_count(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::ReportCount)
        .unwrap_or(0u64)
}

fn load_stream(env: &Env, stream_id: u64) -> Result<Stream, ContractError> {
    env.storage()
        .persistent()
        .get(&DataKey::Stream(stream_id))
        .ok_or(ContractError::StreamNotFound)
}

fn save_stream(env: &Env, stream: &Stream) {
    let key = DataKey::Stream(stream.stream_id);
    env.storage().persistent().set(&key, stream);
    env.storage().persistent().extend_ttl(&key, 17280, 120960);
}

/// Removing the record is the tombstone: ids are never reused, so absence
/// is unambiguous "does not exist".
fn remove_stream(env: &Env, stream_id: u64) {
    env.storage().persistent().remove(&DataKey::Stream(stream_id));
}

fn load_report(env: &Env, report_id: u64) -> Result<Report, ContractError> {
    env.storage()
        .persistent()
        .get(&DataKey::Report(report_id))
        .ok_or(ContractError::ReportNotFound)
}

fn save_report(env: &Env, report: &Report) {
    let key = DataKey::Report(report.id);
    env.storage().persistent().set(&key, report);
    env.storage().persistent().extend_ttl(&key, 17280, 120960);
}

fn user_report_ids(env: &Env, reporter: &Address) -> Vec<u64> {
    env.storage()
        .persistent()
        .get(&DataKey::UserReports(reporter.clone()))
        .unwrap_or_else(|| Vec::new(env))
}

fn push_user_report(env: &Env, reporter: &Address, report_id: u64) {
    let key = DataKey::UserReports(reporter.clone());
    let mut ids = user_report_ids(env, reporter);
    ids.push_back(report_id);
    env.storage().persistent().set(&key, &ids);
    env.storage().persistent().extend_ttl(&key, 17280, 120960);
}

/// One contract-wide mutex, not per-stream: no guarded operation may nest
/// inside another on the same call stack. A failed invocation is rolled
/// back by the host, so the flag cannot stick.
fn guard_enter(env: &Env) -> Result<(), ContractError> {
    if env
        .storage()
        .instance()
        .get::<_, bool>(&DataKey::Guard)
        .unwrap_or(false)
    {
        return Err(ContractError::ReentrantCall);
    }
    env.storage().instance().set(&DataKey::Guard, &true);
    Ok(())
}

fn guard_exit(env: &Env) {
    env.storage().instance().set(&DataKey::Guard, &false);
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

impl Veristream {
    /// Validates, pulls the deposit into custody and persists the record.
    /// Any token failure panics in the host and rolls the invocation back,
    /// so the stream, the counters and the transfer succeed or fail as one.
    fn open_stream(
        env: &Env,
        sender: Address,
        recipient: Address,
        deposit: i128,
        token: Address,
        start_time: u64,
        stop_time: u64,
    ) -> u64 {
        assert!(deposit > 0, "deposit is zero");
        assert!(stop_time > start_time, "stop time before the start time");

        let duration = i128::from(stop_time - start_time);
        assert!(deposit >= duration, "deposit smaller than time delta");

        // Truncating division: the remainder is never streamed and settles
        // on the sender side of the balance split.
        let rate_per_second =
            math::checked_div(deposit, duration).expect("stream duration is zero");

        let token_client = token::Client::new(env, &token);
        token_client.transfer(&sender, &env.current_contract_address(), &deposit);

        let stream_id = allocate_stream_id(env);
        let stream = Stream {
            stream_id,
            sender: sender.clone(),
            recipient: recipient.clone(),
            token: token.clone(),
            deposit,
            remaining_balance: deposit,
            rate_per_second,
            start_time,
            stop_time,
        };
        save_stream(env, &stream);

        env.events().publish(
            (symbol_short!("created"), stream_id),
            (sender, recipient, deposit, token, start_time, stop_time),
        );

        stream_id
    }

    /// A stream that pays the funder back to themselves, starting now. Not
    /// exported: `report_event` is the only caller, which keeps its
    /// stream-id snapshot matched to the stream created here.
    fn open_reverse_stream(
        env: &Env,
        funder: Address,
        deposit: i128,
        token: Address,
        stop_time: u64,
    ) -> u64 {
        let start_time = env.ledger().timestamp();
        Self::open_stream(env, funder.clone(), funder, deposit, token, start_time, stop_time)
    }

    /// Elapsed streamed seconds: zero before the start, saturating at the
    /// full duration after the stop.
    fn delta_of_stream(env: &Env, stream: &Stream) -> u64 {
        let now = env.ledger().timestamp();
        if now <= stream.start_time {
            return 0;
        }
        if now < stream.stop_time {
            return now - stream.start_time;
        }
        stream.stop_time - stream.start_time
    }

    /// Reverse streams start at their creation timestamp, so ledger time
    /// never precedes `start_time`; a violation means a corrupted record.
    fn delta_of_reverse_stream(env: &Env, stream: &Stream) -> u64 {
        let now = env.ledger().timestamp();
        assert!(
            now >= stream.start_time,
            "reverse stream starts in the future"
        );
        if now < stream.stop_time {
            return now - stream.start_time;
        }
        stream.stop_time - stream.start_time
    }

    /// The recipient-side balance: time-accrued amount minus whatever has
    /// already been withdrawn. The interior arithmetic cannot fail while
    /// `deposit >= deposit - remaining_balance >= 0` holds; a failure here
    /// signals ledger corruption, not user error.
    fn accrued_balance(stream: &Stream, delta: u64) -> i128 {
        let mut recipient_balance = math::checked_mul(stream.rate_per_second, i128::from(delta))
            .expect("rate times elapsed time overflows");

        if stream.deposit > stream.remaining_balance {
            let withdrawn = math::checked_sub(stream.deposit, stream.remaining_balance)
                .expect("remaining balance exceeds the deposit");
            recipient_balance = math::checked_sub(recipient_balance, withdrawn)
                .expect("withdrawn amount exceeds the accrued balance");
        }
        recipient_balance
    }

    /// Same accrual and withdrawal adjustment as `accrued_balance`, driven
    /// by the reverse delta. A reverse stream has one accruing party.
    fn reverse_stream_balance(env: &Env, stream: &Stream) -> i128 {
        Self::accrued_balance(stream, Self::delta_of_reverse_stream(env, stream))
    }

    /// Reports link to streams one-to-one; this walk is the same range
    /// `get_all_reports` materializes.
    fn report_for_stream(env: &Env, stream_id: u64) -> Result<Report, ContractError> {
        let count = report_count(env);
        for report_id in 0..count {
            let report = load_report(env, report_id)?;
            if report.stream_id == stream_id {
                return Ok(report);
            }
        }
        Err(ContractError::ReportNotFound)
    }

    fn flip_report_validity(env: &Env, report: &mut Report) -> bool {
        report.valid = !report.valid;
        save_report(env, report);
        env.events()
            .publish((symbol_short!("validity"), report.id), report.valid);
        report.valid
    }
}

// ---------------------------------------------------------------------------
// Contract implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct Veristream;

#[contractimpl]
impl Veristream {
    /// Initialise the contract with the privileged owner address.
    ///
    /// Must be called exactly once before any other operation. Stores the
    /// owner and zeroes both global counters.
    ///
    /// # Panics
    /// - If called more than once
    pub fn init(env: Env, admin: Address) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic!("already initialised");
        }
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::NextStreamId, &0u64);
        env.storage().instance().set(&DataKey::ReportCount, &0u64);

        // Ensure instance storage (owner/counters) doesn't expire quickly
        env.storage().instance().extend_ttl(17280, 120960);
    }

    /// Rotate the owner key. Only the current owner may call this.
    pub fn set_admin(env: Env, new_admin: Address) {
        let old_admin = get_admin(&env);
        old_admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &new_admin);
        env.events().publish(
            (symbol_short!("admin"), symbol_short!("updated")),
            (old_admin, new_admin),
        );
    }

    /// Create a new payment stream funded by `sender`.
    ///
    /// Pulls `deposit` tokens from `sender` into contract custody and
    /// persists a stream that releases them to `recipient` at a constant
    /// per-second rate over `[start_time, stop_time)`. The rate is
    /// `deposit / (stop_time - start_time)`, truncated; the remainder is
    /// never streamed and falls to the sender side of the balance split.
    ///
    /// # Parameters
    /// - `sender`: address funding the stream (must authorize)
    /// - `recipient`: address accruing the streamed tokens
    /// - `deposit`: total amount to lock, must cover at least one token per
    ///   second of duration
    /// - `token`: token contract holding custody of the funds
    /// - `start_time`, `stop_time`: streaming interval bounds
    ///
    /// # Returns
    /// - `u64`: the new stream's identifier
    ///
    /// # Panics
    /// - `"deposit is zero"` if `deposit == 0`
    /// - `"stop time before the start time"` if `stop_time <= start_time`
    /// - `"deposit smaller than time delta"` if `deposit < duration`, which
    ///   would truncate the rate to zero
    /// - If the token transfer fails (insufficient balance); no state
    ///   change survives in that case
    ///
    /// # Events
    /// - `("created", stream_id)` with
    ///   `(sender, recipient, deposit, token, start_time, stop_time)`
    pub fn create_stream(
        env: Env,
        sender: Address,
        recipient: Address,
        deposit: i128,
        token: Address,
        start_time: u64,
        stop_time: u64,
    ) -> u64 {
        sender.require_auth();
        Self::open_stream(&env, sender, recipient, deposit, token, start_time, stop_time)
    }

    /// Retrieve a stream record.
    pub fn get_stream(env: Env, stream_id: u64) -> Result<Stream, ContractError> {
        load_stream(&env, stream_id)
    }

    /// Seconds of streaming elapsed for `stream_id`: zero at or before the
    /// start, capped at the full duration after the stop.
    pub fn delta_of(env: Env, stream_id: u64) -> Result<u64, ContractError> {
        let stream = load_stream(&env, stream_id)?;
        Ok(Self::delta_of_stream(&env, &stream))
    }

    /// Balance of `who` within the stream.
    ///
    /// The recipient's balance is the time-accrued amount minus previous
    /// withdrawals; the sender's balance is whatever of `remaining_balance`
    /// has not yet accrued; anyone else holds zero. The two party balances
    /// always sum to `remaining_balance`.
    pub fn balance_of(env: Env, stream_id: u64, who: Address) -> Result<i128, ContractError> {
        let stream = load_stream(&env, stream_id)?;
        let delta = Self::delta_of_stream(&env, &stream);
        let recipient_balance = Self::accrued_balance(&stream, delta);

        if who == stream.recipient {
            return Ok(recipient_balance);
        }
        if who == stream.sender {
            let sender_balance = math::checked_sub(stream.remaining_balance, recipient_balance)
                .expect("accrued balance exceeds the remaining balance");
            return Ok(sender_balance);
        }
        Ok(0)
    }

    /// Withdraw `amount` from the stream to its recipient.
    ///
    /// Callable by the stream's sender or recipient; the payout always goes
    /// to the recipient. Draining `remaining_balance` to exactly zero
    /// deletes the stream; no other path completes one.
    ///
    /// # Panics
    /// - `"caller is not the sender or the recipient of the stream"`
    /// - `"amount is zero"` if `amount == 0`
    /// - `"amount exceeds the available balance"` if `amount` is larger
    ///   than the recipient balance (rejected, not clamped)
    /// - If the token transfer fails; the balance decrement is rolled back
    ///   with everything else
    ///
    /// # Errors
    /// - `StreamNotFound` for an unknown or already-deleted stream
    /// - `ReentrantCall` if a guarded operation is already executing
    ///
    /// # Events
    /// - `("withdrawn", stream_id)` with `(recipient, amount)`
    pub fn withdraw_from_stream(
        env: Env,
        caller: Address,
        stream_id: u64,
        amount: i128,
    ) -> Result<(), ContractError> {
        caller.require_auth();
        guard_enter(&env)?;

        let mut stream = load_stream(&env, stream_id)?;
        assert!(
            caller == stream.sender || caller == stream.recipient,
            "caller is not the sender or the recipient of the stream"
        );
        assert!(amount > 0, "amount is zero");

        let delta = Self::delta_of_stream(&env, &stream);
        let available = Self::accrued_balance(&stream, delta);
        assert!(amount <= available, "amount exceeds the available balance");

        stream.remaining_balance = math::checked_sub(stream.remaining_balance, amount)
            .expect("withdrawal larger than the remaining balance");

        if stream.remaining_balance == 0 {
            remove_stream(&env, stream_id);
        } else {
            save_stream(&env, &stream);
        }

        let token_client = token::Client::new(&env, &stream.token);
        token_client.transfer(&env.current_contract_address(), &stream.recipient, &amount);

        guard_exit(&env);

        env.events().publish(
            (symbol_short!("withdrawn"), stream_id),
            (stream.recipient.clone(), amount),
        );
        Ok(())
    }

    /// Cancel a stream and settle both sides.
    ///
    /// Owner-only. Deletes the stream unconditionally, then pays the
    /// accrued balance to the recipient and the unaccrued remainder to the
    /// sender, skipping zero payouts. Either transfer failing aborts the
    /// whole operation.
    ///
    /// # Errors
    /// - `StreamNotFound`, `ReentrantCall`
    ///
    /// # Events
    /// - `("cancelled", stream_id)` with `(sender_amount, recipient_amount)`
    pub fn cancel_stream(env: Env, stream_id: u64) -> Result<(), ContractError> {
        get_admin(&env).require_auth();
        guard_enter(&env)?;

        let stream = load_stream(&env, stream_id)?;
        let delta = Self::delta_of_stream(&env, &stream);
        let recipient_amount = Self::accrued_balance(&stream, delta);
        let sender_amount = math::checked_sub(stream.remaining_balance, recipient_amount)
            .expect("accrued balance exceeds the remaining balance");

        remove_stream(&env, stream_id);

        let token_client = token::Client::new(&env, &stream.token);
        if recipient_amount > 0 {
            token_client.transfer(
                &env.current_contract_address(),
                &stream.recipient,
                &recipient_amount,
            );
        }
        if sender_amount > 0 {
            token_client.transfer(&env.current_contract_address(), &stream.sender, &sender_amount);
        }

        guard_exit(&env);

        env.events().publish(
            (symbol_short!("cancelled"), stream_id),
            (sender_amount, recipient_amount),
        );
        Ok(())
    }

    /// Tear down a reverse stream and invalidate its claim.
    ///
    /// Requires the stream's sender (the reporter who funded the claim).
    /// Burns the reverse-stream balance out of custody instead of paying it
    /// out, deletes the stream, flips the linked report's validity flag and
    /// returns the new flag.
    ///
    /// # Errors
    /// - `StreamNotFound`; `ReportNotFound` if no report links to the
    ///   stream; `ReentrantCall`
    ///
    /// # Events
    /// - `("validity", report_id)` with the new flag
    pub fn close(env: Env, stream_id: u64) -> Result<bool, ContractError> {
        guard_enter(&env)?;

        let stream = load_stream(&env, stream_id)?;
        stream.sender.require_auth();

        let remaining_balance = Self::reverse_stream_balance(&env, &stream);
        let mut report = Self::report_for_stream(&env, stream_id)?;

        remove_stream(&env, stream_id);

        if remaining_balance > 0 {
            let token_client = token::Client::new(&env, &stream.token);
            token_client.burn(&env.current_contract_address(), &remaining_balance);
        }

        let valid = Self::flip_report_validity(&env, &mut report);
        guard_exit(&env);
        Ok(valid)
    }

    /// File a report and lock its deposit in a reverse stream.
    ///
    /// Allocates the next report id, snapshots the id of the stream about
    /// to be created, stores the report as valid, indexes it under the
    /// reporter, then opens a reverse stream (`sender == recipient ==
    /// reporter`, starting now) that pulls `deposit` into custody. A failed
    /// token pull rolls back the report along with everything else.
    ///
    /// # Returns
    /// - `u64`: the new report's identifier
    ///
    /// # Events
    /// - `("reported", report_id)` with `(reporter, stream_id, amount)`,
    ///   after the `("created", stream_id)` event of the backing stream
    pub fn report_event(
        env: Env,
        reporter: Address,
        content: String,
        deposit: i128,
        token: Address,
        stop_time: u64,
    ) -> u64 {
        reporter.require_auth();

        let report_id = report_count(&env);
        // Read before the stream exists; `open_reverse_stream` below is the
        // only id allocator reachable from this operation, so the snapshot
        // names the stream it is about to create.
        let stream_id = next_stream_id(&env);

        let report = Report {
            id: report_id,
            reporter: reporter.clone(),
            content,
            amount: deposit,
            stream_id,
            valid: true,
        };
        save_report(&env, &report);
        push_user_report(&env, &reporter, report_id);

        Self::open_reverse_stream(&env, reporter.clone(), deposit, token, stop_time);

        let next = report_id.checked_add(1).expect("report counter overflow");
        env.storage().instance().set(&DataKey::ReportCount, &next);

        env.events().publish(
            (symbol_short!("reported"), report_id),
            (reporter, stream_id, deposit),
        );

        report_id
    }

    /// Flip a report's validity flag. Owner-only; a second call restores
    /// the original value. Returns the new flag.
    pub fn toggle_report_validity(env: Env, report_id: u64) -> Result<bool, ContractError> {
        get_admin(&env).require_auth();
        let mut report = load_report(&env, report_id)?;
        Ok(Self::flip_report_validity(&env, &mut report))
    }

    /// Retrieve a report record.
    pub fn get_report(env: Env, report_id: u64) -> Result<Report, ContractError> {
        load_report(&env, report_id)
    }

    /// All reports filed by `reporter`, in filing order.
    pub fn get_user_reports(env: Env, reporter: Address) -> Vec<Report> {
        let ids = user_report_ids(&env, &reporter);
        let mut reports = Vec::new(&env);
        for report_id in ids.iter() {
            let report = load_report(&env, report_id).expect("report missing from the registry");
            reports.push_back(report);
        }
        reports
    }

    /// Every report ever filed, including ones whose backing stream has
    /// since been drained, cancelled or closed.
    pub fn get_all_reports(env: Env) -> Vec<Report> {
        let mut reports = Vec::new(&env);
        for report_id in 0..report_count(&env) {
            let report = load_report(&env, report_id).expect("report missing from the registry");
            reports.push_back(report);
        }
        reports
    }
}
