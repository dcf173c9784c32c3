mod backfill;
mod common;
mod confirmations;
mod ledger_failures;
mod registrations;
mod reorg;
mod resubscribe;
