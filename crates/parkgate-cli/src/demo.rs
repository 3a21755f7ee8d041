//! Simulated bus for `--demo`.
//!
//! Every configured module answers status reads with a closed barrier and
//! echoes every other command. Each module presents a credential on every
//! `novelty_every`-th status read, cycling through the configured cards and
//! one code that no store knows.

use chrono::Local;
use parkgate_core::constants::{NOVELTY_IDENTIFICATION_LENGTH, TIMESTAMP_FORMAT};
use parkgate_core::{Identification, ModuleAddress};
use parkgate_protocol::{Opcode, StatusReport, encode_frame};
use parkgate_transport::{MockLinkHandle, MockResponse};
use std::collections::HashMap;

/// Code presented after the configured cards, to show a denial.
pub const UNKNOWN_CARD: &str = "DEMO0000";

pub struct DemoBus {
    modules: HashMap<ModuleAddress, u32>,
    cards: Vec<String>,
    next_card: usize,
    novelty_every: u32,
}

impl DemoBus {
    pub fn new(
        addresses: &[ModuleAddress],
        cards: impl IntoIterator<Item = Identification>,
        novelty_every: u32,
    ) -> Self {
        let mut cards: Vec<String> = cards
            .into_iter()
            .map(String::from)
            .filter(|code| code.len() <= NOVELTY_IDENTIFICATION_LENGTH)
            .collect();
        cards.push(UNKNOWN_CARD.to_string());

        Self {
            modules: addresses.iter().map(|address| (*address, 0)).collect(),
            cards,
            next_card: 0,
            novelty_every: novelty_every.max(1),
        }
    }

    /// Install as the responder of a mock link.
    pub fn install(self, handle: &MockLinkHandle) {
        let mut bus = self;
        handle.set_responder(move |command| bus.answer(command.address(), command.opcode()));
    }

    fn answer(&mut self, address: ModuleAddress, opcode: Opcode) -> MockResponse {
        let Some(reads) = self.modules.get_mut(&address) else {
            return MockResponse::Timeout;
        };
        if opcode != Opcode::Status {
            return MockResponse::reply(encode_frame(address, opcode, &[]));
        }

        *reads += 1;
        if *reads % self.novelty_every != 0 {
            return MockResponse::status(address, StatusReport::default());
        }

        let code = &self.cards[self.next_card % self.cards.len()];
        self.next_card += 1;
        MockResponse::reply(encode_frame(
            address,
            Opcode::StatusNovelty,
            &novelty_payload(code),
        ))
    }
}

fn novelty_payload(code: &str) -> Vec<u8> {
    let mut payload = StatusReport::default().to_bytes().to_vec();
    let field = format!("{code:<width$}", width = NOVELTY_IDENTIFICATION_LENGTH);
    payload.extend_from_slice(field.as_bytes());
    let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    payload.extend_from_slice(stamp.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkgate_protocol::{Command, Reply, decode_reply};
    use parkgate_transport::{Link, MockLink};
    use std::time::Duration;

    fn addr(n: u8) -> ModuleAddress {
        ModuleAddress::new(n).unwrap()
    }

    async fn read(link: &mut MockLink, address: ModuleAddress) -> Reply {
        let raw = link
            .poll(&Command::status(address), Duration::from_secs(1))
            .await
            .unwrap();
        Reply::from_frame(&decode_reply(&raw.bytes).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_novelty_on_every_third_read() {
        let (mut link, handle) = MockLink::new();
        let card = Identification::new("1234").unwrap();
        DemoBus::new(&[addr(1)], [card.clone()], 3).install(&handle);

        assert!(matches!(read(&mut link, addr(1)).await, Reply::Status(_)));
        assert!(matches!(read(&mut link, addr(1)).await, Reply::Status(_)));
        match read(&mut link, addr(1)).await {
            Reply::Novelty(novelty) => {
                assert_eq!(novelty.identification, card);
                assert!(novelty.presented_at.is_some());
            }
            other => panic!("expected a novelty, got {other:?}"),
        }

        for _ in 0..2 {
            read(&mut link, addr(1)).await;
        }
        match read(&mut link, addr(1)).await {
            Reply::Novelty(novelty) => assert_eq!(novelty.identification.as_str(), UNKNOWN_CARD),
            other => panic!("expected a novelty, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_echoed_and_strangers_silent() {
        let (mut link, handle) = MockLink::new();
        DemoBus::new(&[addr(1)], [], 5).install(&handle);

        let command = Command::continue_sequence(addr(1));
        let raw = link.poll(&command, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            decode_reply(&raw.bytes).unwrap().opcode,
            Opcode::ContinueSequence
        );

        assert!(
            link.poll(&Command::status(addr(2)), Duration::from_secs(1))
                .await
                .is_err()
        );
    }
}
