//! In-memory node for relayer tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use bitcoin::{
    Address, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, WPubkeyHash, Witness,
    absolute::LockTime,
    block::{self, Header},
    blockdata::constants::genesis_block,
    hashes::Hash,
    key::XOnlyPublicKey,
    transaction::Version,
};
use btcda_envelope_fmt::build_leaf_script;
use btcda_taproot::verify_script_spend;

use crate::node::{NodeClient, NodeError, NodeResult};

/// Where [`MemNode::send_to_address`] puts an extra output worth the same
/// amount as the payment.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DecoyPlacement {
    BeforePayment,
    AfterPayment,
}

const CHANGE_SAT: u64 = 50_000;

#[derive(Debug)]
struct State {
    txs: HashMap<Txid, Transaction>,
    confirmed: HashMap<Txid, BlockHash>,
    blocks: Vec<Block>,
    mempool: Vec<Txid>,
    spent: HashSet<OutPoint>,
    balance: Amount,
    decoy: Option<DecoyPlacement>,
    reject_next: bool,
    nonce: u32,
}

/// Node with a wallet, a mempool and a chain that only grows when
/// [`MemNode::mine`] is called.
///
/// Script-path spends of P2TR outputs are checked before they are accepted.
#[derive(Debug)]
pub(crate) struct MemNode {
    state: Mutex<State>,
}

impl MemNode {
    pub(crate) fn new() -> Self {
        let genesis = genesis_block(Network::Regtest);
        Self {
            state: Mutex::new(State {
                txs: HashMap::new(),
                confirmed: HashMap::new(),
                blocks: vec![genesis],
                mempool: Vec::new(),
                spent: HashSet::new(),
                balance: Amount::from_sat(100_000_000),
                decoy: None,
                reject_next: false,
                nonce: 0,
            }),
        }
    }

    pub(crate) fn set_decoy(&self, decoy: Option<DecoyPlacement>) {
        self.state.lock().unwrap().decoy = decoy;
    }

    pub(crate) fn set_wallet_balance(&self, balance: Amount) {
        self.state.lock().unwrap().balance = balance;
    }

    /// Makes the next `send_raw_transaction` fail as a policy rejection.
    pub(crate) fn reject_next_broadcast(&self) {
        self.state.lock().unwrap().reject_next = true;
    }

    /// Number of transactions seen, confirmed or not.
    pub(crate) fn tx_count(&self) -> usize {
        self.state.lock().unwrap().txs.len()
    }

    /// Adds a non-blob transaction to the mempool. Shapes vary with `i`.
    pub(crate) fn add_unrelated_tx(&self, i: u32) {
        let mut state = self.state.lock().unwrap();
        let witness = match i % 3 {
            0 => Witness::new(),
            1 => Witness::from_slice(&[vec![0x30; 71], vec![0x02; 33]]),
            _ => {
                let key = XOnlyPublicKey::from_slice(&[
                    0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce,
                    0x87, 0x0b, 0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2,
                    0x81, 0x5b, 0x16, 0xf8, 0x17, 0x98,
                ])
                .unwrap();
                // Same envelope shape with a foreign tag.
                let leaf = build_leaf_script(b"ordi", &key).unwrap();
                Witness::from_slice(&[vec![0x01; 64], leaf.into_bytes(), vec![0xc0; 33]])
            }
        };
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: state.fresh_outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness,
            }],
            output: vec![TxOut {
                value: Amount::from_sat(10_000 + i as u64),
                script_pubkey: wallet_script(i as u8),
            }],
        };
        state.insert(tx);
    }

    /// Confirms the mempool in a new block and returns its height.
    pub(crate) fn mine(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        let height = state.blocks.len() as u64;
        let prev = state
            .blocks
            .last()
            .map(|b| b.block_hash())
            .unwrap_or_else(BlockHash::all_zeros);

        let coinbase = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::builder().push_int(height as i64).into_script(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50 * 100_000_000),
                script_pubkey: wallet_script(0xcb),
            }],
        };

        let mempool = std::mem::take(&mut state.mempool);
        let mut txdata = vec![coinbase];
        txdata.extend(mempool.iter().map(|txid| state.txs[txid].clone()));

        let block = Block {
            header: Header {
                version: block::Version::TWO,
                prev_blockhash: prev,
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_700_000_000 + height as u32,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: height as u32,
            },
            txdata,
        };
        let hash = block.block_hash();
        for txid in mempool {
            state.confirmed.insert(txid, hash);
        }
        state.blocks.push(block);
        height
    }
}

impl State {
    fn fresh_outpoint(&mut self) -> OutPoint {
        self.nonce += 1;
        let mut bytes = [0xfe; 32];
        bytes[..4].copy_from_slice(&self.nonce.to_le_bytes());
        OutPoint::new(Txid::from_byte_array(bytes), 0)
    }

    fn insert(&mut self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.txs.insert(txid, tx);
        self.mempool.push(txid);
        txid
    }

    fn prevout(&self, outpoint: &OutPoint) -> NodeResult<TxOut> {
        self.txs
            .get(&outpoint.txid)
            .and_then(|tx| tx.output.get(outpoint.vout as usize))
            .cloned()
            .ok_or_else(|| NodeError::Rejected(format!("missing inputs: {outpoint}")))
    }
}

fn wallet_script(n: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]))
}

impl NodeClient for MemNode {
    fn send_to_address(&self, address: &Address, amount: Amount) -> NodeResult<Txid> {
        let mut state = self.state.lock().unwrap();
        let needed = amount + Amount::from_sat(CHANGE_SAT);
        if state.balance < needed {
            return Err(NodeError::Rejected("insufficient funds".into()));
        }
        state.balance -= amount;

        let payment = TxOut {
            value: amount,
            script_pubkey: address.script_pubkey(),
        };
        let decoy = TxOut {
            value: amount,
            script_pubkey: wallet_script(0xdd),
        };
        let change = TxOut {
            value: Amount::from_sat(CHANGE_SAT),
            script_pubkey: wallet_script(0xcc),
        };
        let output = match state.decoy {
            None => vec![payment, change],
            Some(DecoyPlacement::BeforePayment) => vec![decoy, payment, change],
            Some(DecoyPlacement::AfterPayment) => vec![payment, decoy, change],
        };

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: state.fresh_outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::from_slice(&[vec![0x30; 71], vec![0x03; 33]]),
            }],
            output,
        };
        Ok(state.insert(tx))
    }

    fn get_raw_transaction(&self, txid: &Txid) -> NodeResult<Transaction> {
        let state = self.state.lock().unwrap();
        state
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("tx {txid}")))
    }

    fn get_block_hash(&self, height: u64) -> NodeResult<BlockHash> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .get(height as usize)
            .map(|b| b.block_hash())
            .ok_or_else(|| NodeError::NotFound(format!("height {height}")))
    }

    fn get_block(&self, hash: &BlockHash) -> NodeResult<Block> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .iter()
            .find(|b| b.block_hash() == *hash)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("block {hash}")))
    }

    fn send_raw_transaction(&self, tx: &Transaction) -> NodeResult<Txid> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.reject_next) {
            return Err(NodeError::Rejected("min relay fee not met".into()));
        }

        let prevouts = tx
            .input
            .iter()
            .map(|input| {
                if state.spent.contains(&input.previous_output) {
                    return Err(NodeError::Rejected(format!(
                        "already spent: {}",
                        input.previous_output
                    )));
                }
                state.prevout(&input.previous_output)
            })
            .collect::<NodeResult<Vec<_>>>()?;

        for (i, prevout) in prevouts.iter().enumerate() {
            if prevout.script_pubkey.is_p2tr() {
                verify_script_spend(tx, i, &prevouts)
                    .map_err(|e| NodeError::Rejected(format!("input {i}: {e}")))?;
            }
        }

        for input in &tx.input {
            state.spent.insert(input.previous_output);
        }
        Ok(state.insert(tx.clone()))
    }

    fn get_transaction_block_hash(&self, txid: &Txid) -> NodeResult<Option<BlockHash>> {
        let state = self.state.lock().unwrap();
        if !state.txs.contains_key(txid) {
            return Err(NodeError::NotFound(format!("tx {txid}")));
        }
        Ok(state.confirmed.get(txid).copied())
    }

    fn get_block_height(&self, hash: &BlockHash) -> NodeResult<u64> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .iter()
            .position(|b| b.block_hash() == *hash)
            .map(|h| h as u64)
            .ok_or_else(|| NodeError::NotFound(format!("block {hash}")))
    }
}
