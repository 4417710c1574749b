//!
//! The congestion tree: the tree of presigned transactions anchored by a
//! round's pool tx, whose leaves mint the round's new vtxos.
//!
//! Nodes are kept in an arena keyed by txid with the parent txid as a
//! lookup reference. The root (and only the root) carries the sweep
//! closure, a CSV-locked script path the server can use to reclaim the
//! whole subtree once the tree's lifetime has elapsed.
//!

use std::collections::HashMap;

use bitcoin::{Psbt, Script, ScriptBuf, Sequence, Txid};
use bitcoin::relative;
use bitcoin::script::Instruction;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CSV, OP_DROP};
use bitcoin::secp256k1::XOnlyPublicKey;

use crate::util;


/// Granularity of seconds-based relative timelocks.
pub const CSV_SECONDS_UNIT: u64 = 512;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TreeError {
	#[error("tree root carries no decodable sweep closure")]
	MalformedTreeRoot,
	#[error("tree must have exactly one root")]
	NoSingleRoot,
	#[error("node {node} references unknown parent {parent}")]
	UnknownParent { node: Txid, parent: Txid },
	#[error("node {0} does not spend an output of its parent")]
	BrokenLink(Txid),
	#[error("cycle detected at node {0}")]
	Cycle(Txid),
	#[error("tx {0} is not a leaf of this tree")]
	UnknownLeaf(Txid),
}

/// A single node of the congestion tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Node {
	pub txid: Txid,
	/// The parent node, [None] for the root.
	pub parent_txid: Option<Txid>,
	/// The presigned transaction of this node.
	pub tx: Psbt,
	pub is_leaf: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CongestionTree {
	nodes: HashMap<Txid, Node>,
	root: Txid,
	/// Leaf txids in construction order, matching the order of the
	/// receivers the tree was built for.
	leaves: Vec<Txid>,
}

impl CongestionTree {
	/// Build a tree from its nodes, validating the structure.
	///
	/// Leaf order is retained as given.
	pub fn new(nodes: Vec<Node>) -> Result<CongestionTree, TreeError> {
		let mut root = None;
		let mut leaves = Vec::new();
		let mut map = HashMap::with_capacity(nodes.len());
		for node in nodes {
			if node.parent_txid.is_none() {
				if root.replace(node.txid).is_some() {
					return Err(TreeError::NoSingleRoot);
				}
			}
			if node.is_leaf {
				leaves.push(node.txid);
			}
			map.insert(node.txid, node);
		}
		let root = root.ok_or(TreeError::NoSingleRoot)?;

		let ret = CongestionTree { nodes: map, root, leaves };
		for node in ret.nodes.values() {
			if let Some(parent) = node.parent_txid {
				let parent_node = ret.nodes.get(&parent).ok_or(TreeError::UnknownParent {
					node: node.txid, parent,
				})?;
				// every non-root node's sole input spends its parent
				let input = node.tx.unsigned_tx.input.first()
					.ok_or(TreeError::BrokenLink(node.txid))?;
				if input.previous_output.txid != parent_node.txid {
					return Err(TreeError::BrokenLink(node.txid));
				}
			}
			// walking up must reach the root within nb_nodes steps
			let mut cursor = node;
			let mut steps = 0;
			while let Some(parent) = cursor.parent_txid {
				cursor = ret.nodes.get(&parent).unwrap();
				steps += 1;
				if steps > ret.nodes.len() {
					return Err(TreeError::Cycle(node.txid));
				}
			}
		}
		Ok(ret)
	}

	pub fn root(&self) -> &Node {
		self.nodes.get(&self.root).expect("root exists")
	}

	pub fn get(&self, txid: Txid) -> Option<&Node> {
		self.nodes.get(&txid)
	}

	pub fn nb_nodes(&self) -> usize {
		self.nodes.len()
	}

	pub fn nb_leaves(&self) -> usize {
		self.leaves.len()
	}

	/// Iterate over all nodes, in no particular order.
	pub fn iter(&self) -> impl Iterator<Item = &Node> {
		self.nodes.values()
	}

	/// Iterate the leaves in construction order.
	pub fn leaves(&self) -> impl Iterator<Item = &Node> {
		self.leaves.iter().map(|txid| self.nodes.get(txid).expect("leaf exists"))
	}

	/// The path of nodes from the root to the given leaf, both inclusive.
	pub fn branch(&self, leaf: Txid) -> Result<Vec<&Node>, TreeError> {
		if !self.leaves.contains(&leaf) {
			return Err(TreeError::UnknownLeaf(leaf));
		}
		let mut path = Vec::new();
		let mut cursor = self.nodes.get(&leaf).expect("leaf exists");
		path.push(cursor);
		while let Some(parent) = cursor.parent_txid {
			cursor = self.nodes.get(&parent).expect("validated on construction");
			path.push(cursor);
		}
		path.reverse();
		Ok(path)
	}

	/// Find the sweep closure on the tree root.
	///
	/// All tap-leaves of the root's sole input are decoded as CSV-signature
	/// closures; of the ones that decode, the largest `seconds` wins. Its
	/// value is the lifetime of every vtxo minted from this tree.
	pub fn find_sweep_closure(&self) -> Result<(ScriptBuf, u64), TreeError> {
		let input = self.root().tx.inputs.first()
			.ok_or(TreeError::MalformedTreeRoot)?;

		let mut best: Option<(ScriptBuf, u64)> = None;
		for (script, _version) in input.tap_scripts.values() {
			if let Some(closure) = CsvSigClosure::decode(script) {
				if best.as_ref().map_or(true, |(_, s)| closure.seconds > *s) {
					best = Some((script.clone(), closure.seconds));
				}
			}
		}
		best.ok_or(TreeError::MalformedTreeRoot)
	}
}

impl crate::util::Encodable for CongestionTree {}
impl crate::util::Decodable for CongestionTree {}

/// A tapscript closure of the form `<n> OP_CSV OP_DROP <pk> OP_CHECKSIG`
/// where `n` encodes a relative timelock in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvSigClosure {
	pub pubkey: XOnlyPublicKey,
	pub seconds: u64,
}

impl CsvSigClosure {
	pub fn encode(&self) -> ScriptBuf {
		util::delayed_sign_seconds(self.seconds as u32, self.pubkey)
	}

	pub fn decode(script: &Script) -> Option<CsvSigClosure> {
		let mut instrs = script.instructions();

		let seq = match instrs.next()?.ok()? {
			Instruction::PushBytes(pb) => {
				let v = util::read_scriptint(pb.as_bytes())?;
				Sequence::from_consensus(u32::try_from(v).ok()?)
			},
			_ => return None,
		};
		match instrs.next()?.ok()? {
			Instruction::Op(op) if op == OP_CSV => {},
			_ => return None,
		}
		match instrs.next()?.ok()? {
			Instruction::Op(op) if op == OP_DROP => {},
			_ => return None,
		}
		let pubkey = match instrs.next()?.ok()? {
			Instruction::PushBytes(pb) => XOnlyPublicKey::from_slice(pb.as_bytes()).ok()?,
			_ => return None,
		};
		match instrs.next()?.ok()? {
			Instruction::Op(op) if op == OP_CHECKSIG => {},
			_ => return None,
		}
		if instrs.next().is_some() {
			return None;
		}

		let seconds = match seq.to_relative_lock_time()? {
			relative::LockTime::Time(t) => t.value() as u64 * CSV_SECONDS_UNIT,
			// height-based locks are not sweep closures
			relative::LockTime::Blocks(_) => return None,
		};
		Some(CsvSigClosure { pubkey, seconds })
	}
}

#[cfg(test)]
mod test {
	use super::*;

	use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Witness};
	use bitcoin::hashes::Hash;
	use bitcoin::secp256k1::{rand, Keypair};
	use bitcoin::taproot::{LeafVersion, TaprootBuilder};

	use crate::util::SECP;

	fn test_pubkey() -> XOnlyPublicKey {
		Keypair::new(&SECP, &mut rand::thread_rng()).x_only_public_key().0
	}

	fn dummy_tx(prev: OutPoint, nb_outputs: usize) -> Transaction {
		Transaction {
			version: bitcoin::transaction::Version(3),
			lock_time: bitcoin::absolute::LockTime::ZERO,
			input: vec![TxIn {
				previous_output: prev,
				sequence: bitcoin::Sequence::MAX,
				script_sig: ScriptBuf::new(),
				witness: Witness::new(),
			}],
			output: vec![TxOut {
				value: Amount::from_sat(1000),
				script_pubkey: ScriptBuf::new(),
			}; nb_outputs],
		}
	}

	/// A chain pool -> root -> middle -> leaf.
	fn chain_tree(pool: Txid) -> (CongestionTree, Vec<Txid>) {
		let root_tx = dummy_tx(OutPoint::new(pool, 0), 1);
		let root_txid = root_tx.compute_txid();
		let middle_tx = dummy_tx(OutPoint::new(root_txid, 0), 1);
		let middle_txid = middle_tx.compute_txid();
		let leaf_tx = dummy_tx(OutPoint::new(middle_txid, 0), 1);
		let leaf_txid = leaf_tx.compute_txid();

		let tree = CongestionTree::new(vec![
			Node {
				txid: root_txid,
				parent_txid: None,
				tx: Psbt::from_unsigned_tx(root_tx).unwrap(),
				is_leaf: false,
			},
			Node {
				txid: middle_txid,
				parent_txid: Some(root_txid),
				tx: Psbt::from_unsigned_tx(middle_tx).unwrap(),
				is_leaf: false,
			},
			Node {
				txid: leaf_txid,
				parent_txid: Some(middle_txid),
				tx: Psbt::from_unsigned_tx(leaf_tx).unwrap(),
				is_leaf: true,
			},
		]).unwrap();
		(tree, vec![root_txid, middle_txid, leaf_txid])
	}

	#[test]
	fn csv_sig_closure_roundtrip() {
		let closure = CsvSigClosure { pubkey: test_pubkey(), seconds: 604672 };
		let decoded = CsvSigClosure::decode(&closure.encode()).unwrap();
		assert_eq!(decoded, closure);

		// non-multiple-of-512 values are floored by the encoding
		let closure = CsvSigClosure { pubkey: test_pubkey(), seconds: 604700 };
		let decoded = CsvSigClosure::decode(&closure.encode()).unwrap();
		assert_eq!(decoded.seconds, 604672);

		assert!(CsvSigClosure::decode(&ScriptBuf::new()).is_none());
	}

	#[test]
	fn branch_walks_root_to_leaf() {
		let pool = Txid::from_slice(&[1; 32]).unwrap();
		let (tree, txids) = chain_tree(pool);

		assert_eq!(tree.nb_nodes(), 3);
		assert_eq!(tree.nb_leaves(), 1);
		assert_eq!(tree.root().txid, txids[0]);

		let branch = tree.branch(txids[2]).unwrap();
		assert_eq!(branch.iter().map(|n| n.txid).collect::<Vec<_>>(), txids);

		// a non-leaf node is not a valid branch target
		assert!(matches!(tree.branch(txids[1]), Err(TreeError::UnknownLeaf(_))));

		// the reconstructed chain links up: each tx spends its parent
		for pair in branch.windows(2) {
			assert_eq!(
				pair[1].tx.unsigned_tx.input[0].previous_output.txid,
				pair[0].txid,
			);
		}
	}

	#[test]
	fn find_sweep_closure_takes_max_seconds() {
		let pool = Txid::from_slice(&[2; 32]).unwrap();
		let (mut tree, txids) = chain_tree(pool);

		let pk = test_pubkey();
		let small = CsvSigClosure { pubkey: pk, seconds: 1024 }.encode();
		let big = CsvSigClosure { pubkey: pk, seconds: 604672 }.encode();

		let taproot = TaprootBuilder::new()
			.add_leaf(1, small.clone()).unwrap()
			.add_leaf(1, big.clone()).unwrap()
			.finalize(&SECP, pk).unwrap();

		let root = tree.nodes.get_mut(&txids[0]).unwrap();
		for script in [&small, &big] {
			let cb = taproot.control_block(&(script.clone(), LeafVersion::TapScript)).unwrap();
			root.tx.inputs[0].tap_scripts.insert(cb, (script.clone(), LeafVersion::TapScript));
		}

		let (script, seconds) = tree.find_sweep_closure().unwrap();
		assert_eq!(seconds, 604672);
		assert_eq!(script, big);
	}

	#[test]
	fn malformed_root_has_no_closure() {
		let pool = Txid::from_slice(&[3; 32]).unwrap();
		let (tree, _) = chain_tree(pool);
		assert!(matches!(tree.find_sweep_closure(), Err(TreeError::MalformedTreeRoot)));
	}
}
