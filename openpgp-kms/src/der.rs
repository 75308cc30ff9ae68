//! DER conversions of cryptographic material
//!
//! SUBJECT PUBLIC KEY INFO (See e.g. RFC3280)
//!
//! SubjectPublicKeyInfo  ::=  SEQUENCE  {
//!   algorithm         AlgorithmIdentifier,
//!   subjectPublicKey  BIT STRING
//! }
//!
//! ECDSA-Sig-Value (RFC3279 Sec. 2.2.3)
//!
//! Ecdsa-Sig-Value  ::=  SEQUENCE  {
//!   r     INTEGER,
//!   s     INTEGER
//! }

use anyhow::Result;
use sequoia_openpgp::types::Curve;

pub mod parse {
    use std::convert::TryFrom;
    use spki::{ObjectIdentifier as Oid, SubjectPublicKeyInfo as Spki};

    const EC_PUBLIC_KEY_OID: Oid = Oid::new("1.2.840.10045.2.1");

    pub fn ec_point_x_y(buf: &[u8]) -> super::Result<(Vec<u8>, Vec<u8>)> {
        let pk = Spki::try_from(buf)
            .map_err(|e| anyhow::anyhow!("bad SubjectPublicKeyInfo: {}", e))?;
        if pk.algorithm.oid != EC_PUBLIC_KEY_OID {
            return Err(anyhow::anyhow!("bad OID when parsing EC key"));
        }

        // RFC5480 Sec 2.2
        //
        // ECPoint ::= OCTET STRING

        let octet_string = pk.subject_public_key;
        let length = octet_string.len();
        if length < 3 || length % 2 == 0 {
            return Err(anyhow::anyhow!("bad EC point, or infinity"));
        }

        //
        // Standards for Elliptic-Curve Cryptography
        // https://www.secg.org/sec1-v2.pdf
        //

        let (w, x, y) = (
            octet_string[0],
            octet_string[1..(length + 1) / 2].to_vec(),
            octet_string[(length + 1) / 2..].to_vec(),
        );
        if w != 0x04 {
            return Err(anyhow::anyhow!("compressed EC point not supported"));
        }

        Ok((x, y))
    }

    pub fn ecdsa_r_s(buf: &[u8]) -> super::Result<(Vec<u8>, Vec<u8>)> {
        Ok(yasna::parse_der(buf, |reader| {
            reader.read_sequence(|reader| {
                let r = reader.next().read_biguint()?.to_bytes_be();
                let s = reader.next().read_biguint()?.to_bytes_be();
                Ok((r, s))
            })
        })?)
    }
}

pub mod serialize {
    use super::*;

    use bit_vec::BitVec;
    use num_bigint::BigUint;
    use yasna::models::ObjectIdentifier as Oid;

    pub fn spki_ec(curve: &Curve, q: &[u8]) -> Result<Vec<u8>> {
        let ec_public_key_oid = Oid::from_slice(&[1, 2, 840, 10045, 2, 1]);
        let named_curve = curve_oid(curve)?;

        let alg_id = yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_oid(&ec_public_key_oid);
                writer.next().write_oid(&named_curve);
            });
        });

        let subj_public_key = BitVec::from_bytes(q);
        Ok(yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_der(&alg_id);
                writer.next().write_bitvec(&subj_public_key);
            });
        }))
    }

    pub fn ecdsa_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
        let (r, s) = (BigUint::from_bytes_be(r), BigUint::from_bytes_be(s));
        yasna::construct_der(|w| {
            w.write_sequence(|w| {
                w.next().write_biguint(&r);
                w.next().write_biguint(&s);
            })
        })
    }

    fn curve_oid(curve: &Curve) -> Result<Oid> {
        let oid = match curve {
            Curve::NistP256 => Oid::from_slice(&[1, 2, 840, 10045, 3, 1, 7]),
            Curve::NistP384 => Oid::from_slice(&[1, 3, 132, 0, 34]),
            Curve::NistP521 => Oid::from_slice(&[1, 3, 132, 0, 35]),
            curve => {
                return Err(anyhow::anyhow!("unsupported curve {}", curve));
            }
        };

        Ok(oid)
    }
}
